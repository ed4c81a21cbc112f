use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    config::{DeploymentDescriptor, Params},
    deploy::{ssh_alias, DeploymentHandler},
    error::Error,
    ssh::RemoteShell,
};

/// Builds a handler from descriptor parameters.
pub type HandlerFactory =
    Arc<dyn Fn(&Params) -> eyre::Result<Box<dyn DeploymentHandler>> + Send + Sync>;

/// Optional structural check run on parameters during config validation.
pub type SchemaValidator = fn(&Params) -> eyre::Result<()>;

/// How to build one type of handler.
#[derive(Clone)]
pub struct RegistryEntry {
    factory: HandlerFactory,
    schema_validator: Option<SchemaValidator>,
}

impl RegistryEntry {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&Params) -> eyre::Result<Box<dyn DeploymentHandler>> + Send + Sync + 'static,
    {
        RegistryEntry {
            factory: Arc::new(factory),
            schema_validator: None,
        }
    }

    pub fn with_schema_validator(mut self, validator: SchemaValidator) -> Self {
        self.schema_validator = Some(validator);
        self
    }

    /// Runs the schema validator, if the entry has one.
    pub fn validate_schema(&self, params: &Params) -> eyre::Result<()> {
        match self.schema_validator {
            Some(validate) => validate(params),
            None => Ok(()),
        }
    }

    pub fn build(&self, params: &Params) -> eyre::Result<Box<dyn DeploymentHandler>> {
        (self.factory)(params)
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("schema_validator", &self.schema_validator.is_some())
            .finish_non_exhaustive()
    }
}

/// Handler type id to factory lookup table.
///
/// Built once by the composition root and passed by reference to config validation and to
/// whatever drives challenges.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: HashMap<String, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registry holding every handler this crate ships (currently `ssh-alias`).
    pub fn with_builtin_handlers(shell: Arc<dyn RemoteShell>) -> Self {
        let mut registry = Registry::new();
        registry.register(ssh_alias::HANDLER_TYPE, ssh_alias::entry(shell));
        registry
    }

    /// Adds `entry` under `handler_type`, replacing any previous registration.
    pub fn register(&mut self, handler_type: impl Into<String>, entry: RegistryEntry) {
        let handler_type = handler_type.into();

        if self.entries.insert(handler_type.clone(), entry).is_some() {
            log::debug!("replaced deployment handler registration: {handler_type}");
        }
    }

    pub fn get(&self, handler_type: &str) -> Option<&RegistryEntry> {
        self.entries.get(handler_type)
    }

    /// Builds a fresh handler for `descriptor`.
    pub fn resolve(
        &self,
        descriptor: &DeploymentDescriptor,
    ) -> eyre::Result<Box<dyn DeploymentHandler>> {
        let entry = self.get(&descriptor.handler_type).ok_or_else(|| {
            Error::Config(format!(
                "unknown deployment handler type: {}",
                descriptor.handler_type
            ))
        })?;

        entry.build(&descriptor.params)
    }

    /// Registered handler type ids, in no particular order.
    pub fn handler_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        config::{Chore, DomainSpec},
        deploy::Challenge,
        error::classify,
        test::FakeShell,
    };

    struct Noop;

    #[async_trait]
    impl DeploymentHandler for Noop {
        fn validate_params(&self, _params: &Params) -> eyre::Result<()> {
            Ok(())
        }

        async fn deploy(&self, _: &Chore, _: &DomainSpec, _: &Challenge) -> eyre::Result<()> {
            Ok(())
        }

        async fn cleanup(&self, _: &Chore, _: &DomainSpec, _: &Challenge) -> eyre::Result<()> {
            Ok(())
        }
    }

    fn counting_entry(builds: Arc<AtomicUsize>) -> RegistryEntry {
        RegistryEntry::new(move |_params| {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Noop))
        })
    }

    fn descriptor(handler_type: &str) -> DeploymentDescriptor {
        DeploymentDescriptor::new(handler_type, Params::new())
    }

    #[test]
    fn test_unknown_type_never_builds() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.register("counting", counting_entry(Arc::clone(&builds)));

        let err = registry
            .resolve(&descriptor("does-not-exist"))
            .err()
            .unwrap();
        assert!(classify(&err).unwrap().is_config());
        assert!(err.to_string().contains("does-not-exist"));
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolve_builds_fresh_handlers() {
        let builds = Arc::new(AtomicUsize::new(0));
        let mut registry = Registry::new();
        registry.register("counting", counting_entry(Arc::clone(&builds)));

        registry.resolve(&descriptor("counting")).unwrap();
        registry.resolve(&descriptor("counting")).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_last_registration_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut registry = Registry::new();
        registry.register("counting", counting_entry(Arc::clone(&first)));
        registry.register("counting", counting_entry(Arc::clone(&second)));

        registry.resolve(&descriptor("counting")).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_types().count(), 1);
    }

    #[test]
    fn test_factory_receives_params() {
        let mut registry = Registry::new();
        registry.register(
            "needs-label",
            RegistryEntry::new(|params| match params.get("label") {
                Some(_) => Ok(Box::new(Noop)),
                None => Err(Error::Param("label is required".to_owned()).into()),
            }),
        );

        let mut params = Params::new();
        params.insert("label".to_owned(), json!("x"));

        registry
            .resolve(&DeploymentDescriptor::new("needs-label", params))
            .unwrap();

        let err = registry.resolve(&descriptor("needs-label")).err().unwrap();
        assert!(classify(&err).unwrap().is_param());
    }

    #[test]
    fn test_schema_validator() {
        fn reject_all(_params: &Params) -> eyre::Result<()> {
            Err(Error::Param("schema says no".to_owned()).into())
        }

        let entry = RegistryEntry::new(|_| Ok(Box::new(Noop)));
        entry.validate_schema(&Params::new()).unwrap();

        let entry = entry.with_schema_validator(reject_all);
        let err = entry.validate_schema(&Params::new()).unwrap_err();
        assert!(classify(&err).unwrap().is_param());
    }

    #[test]
    fn test_builtin_handlers() {
        let registry = Registry::with_builtin_handlers(Arc::new(FakeShell::default()));
        assert!(registry.get("ssh-alias").is_some());
        assert!(registry.get("local-copy").is_none());
    }
}
