//! Registry of step factories, keyed by qualified name.

use super::{AddConstantFactory, Preprocessor, PreprocessorList, StepDefinition, StepFactory};
use crate::error::{PreprocessError, Result};
use crate::table::Table;
use std::fmt;
use std::sync::Arc;

/// Step factories available to a run, kept in priority order.
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: Vec<Arc<dyn StepFactory>>,
}

impl StepRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in step.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AddConstantFactory));
        registry
    }

    /// Register `factory`, replacing any factory with the same qualified name.
    pub fn register(&mut self, factory: Arc<dyn StepFactory>) {
        self.factories
            .retain(|existing| existing.qualname() != factory.qualname());
        let position = self
            .factories
            .iter()
            .position(|existing| existing.priority() > factory.priority())
            .unwrap_or(self.factories.len());
        self.factories.insert(position, factory);
    }

    pub fn get(&self, qualname: &str) -> Option<&Arc<dyn StepFactory>> {
        self.factories.iter().find(|f| f.qualname() == qualname)
    }

    /// Factories in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn StepFactory>> {
        self.factories.iter()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Build one step from its definition.
    pub fn build(
        &self,
        definition: &StepDefinition,
        reference: Option<&Table>,
    ) -> Result<Arc<dyn Preprocessor>> {
        let factory = self
            .get(&definition.qualname)
            .ok_or_else(|| PreprocessError::UnknownStep(definition.qualname.clone()))?;
        factory.build(&definition.params, reference)
    }

    /// Build a pipeline from definitions without running it.
    ///
    /// Returns `None` for an empty list, matching what a run produces.
    pub fn build_list(&self, definitions: &[StepDefinition]) -> Result<Option<PreprocessorList>> {
        let steps = definitions
            .iter()
            .map(|definition| self.build(definition, None))
            .collect::<Result<Vec<_>>>()?;
        Ok((!steps.is_empty()).then(|| PreprocessorList::new(steps)))
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|factory| factory.qualname()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::StepParams;

    #[derive(Debug)]
    struct Identity;

    impl Preprocessor for Identity {
        fn name(&self) -> &str {
            "Identity"
        }

        fn apply(&self, data: &Table) -> Result<Table> {
            Ok(data.clone())
        }

        fn definitions(&self) -> Vec<StepDefinition> {
            vec![StepDefinition::new("test.identity")]
        }
    }

    struct IdentityFactory(i32);

    impl StepFactory for IdentityFactory {
        fn qualname(&self) -> &'static str {
            "test.identity"
        }

        fn display_name(&self) -> &'static str {
            "Identity"
        }

        fn priority(&self) -> i32 {
            self.0
        }

        fn build(&self, _: &StepParams, _: Option<&Table>) -> Result<Arc<dyn Preprocessor>> {
            Ok(Arc::new(Identity))
        }
    }

    #[test]
    fn test_defaults_contain_add_constant() {
        let registry = StepRegistry::with_defaults();
        let factory = registry.get(AddConstantFactory::QUALNAME).unwrap();
        assert_eq!(factory.display_name(), "Add constant");
    }

    #[test]
    fn test_unknown_step() {
        let registry = StepRegistry::with_defaults();
        let result = registry.build(&StepDefinition::new("nope"), None);
        assert!(matches!(result, Err(PreprocessError::UnknownStep(name)) if name == "nope"));
    }

    #[test]
    fn test_priority_order_and_replacement() {
        let mut registry = StepRegistry::with_defaults();
        registry.register(Arc::new(IdentityFactory(10)));

        let order: Vec<&str> = registry.iter().map(|f| f.qualname()).collect();
        assert_eq!(order, vec!["test.identity", AddConstantFactory::QUALNAME]);

        registry.register(Arc::new(IdentityFactory(200)));
        let order: Vec<&str> = registry.iter().map(|f| f.qualname()).collect();
        assert_eq!(order, vec![AddConstantFactory::QUALNAME, "test.identity"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_build_list_empty_is_none() {
        let registry = StepRegistry::with_defaults();
        assert!(registry.build_list(&[]).unwrap().is_none());
    }

    #[test]
    fn test_build_list_keeps_order() {
        let mut registry = StepRegistry::with_defaults();
        registry.register(Arc::new(IdentityFactory(0)));

        let definitions = vec![
            StepDefinition::new(AddConstantFactory::QUALNAME).with_param("amount", 1.0),
            StepDefinition::new("test.identity"),
        ];
        let list = registry.build_list(&definitions).unwrap().unwrap();
        assert_eq!(list.definitions(), definitions);
    }
}
