//! Static module descriptors.
//!
//! A [`ModuleDescriptor`] is supplied once at registration and never changes
//! afterwards. It is validated when built, so the registry only ever sees
//! descriptors with a usable name, version, dependency list and route prefix.

use std::collections::BTreeMap;

use serde::Serialize;

/// Errors produced while building a [`ModuleDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("module name must not be empty")]
    EmptyName,

    #[error("module name '{name}' may only contain lowercase letters, digits, '_' and '-'")]
    InvalidName { name: String },

    #[error("module '{module}' must declare a version")]
    EmptyVersion { module: String },

    #[error("module '{module}' declares an empty dependency name")]
    EmptyDependency { module: String },

    #[error("module '{module}' declares dependency '{dependency}' more than once")]
    DuplicateDependency { module: String, dependency: String },

    #[error(
        "module '{module}' has invalid route prefix '{prefix}': must start with '/', must not end with '/'"
    )]
    InvalidRoutePrefix { module: String, prefix: String },

    #[error("module '{module}' declares an empty feature name")]
    EmptyFeature { module: String },
}

/// Immutable configuration record identifying a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    name: String,
    version: String,
    description: String,
    enabled: bool,
    dependencies: Vec<String>,
    route_prefix: Option<String>,
    features: BTreeMap<String, bool>,
}

impl ModuleDescriptor {
    /// Start building a descriptor for `name` at `version`.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            enabled: true,
            dependencies: Vec::new(),
            route_prefix: None,
            features: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Declared dependencies, in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    #[must_use]
    pub fn route_prefix(&self) -> Option<&str> {
        self.route_prefix.as_deref()
    }

    /// Prefix the standard endpoints are mounted under.
    ///
    /// Falls back to `/{name}` when the descriptor has no explicit prefix.
    #[must_use]
    pub fn effective_route_prefix(&self) -> String {
        self.route_prefix
            .clone()
            .unwrap_or_else(|| format!("/{}", self.name))
    }

    #[must_use]
    pub fn features(&self) -> &BTreeMap<String, bool> {
        &self.features
    }

    /// Whether a declared feature is switched on.
    ///
    /// A name the descriptor does not declare reads as disabled and is
    /// logged, so a misspelled lookup in module code shows up in the logs.
    #[must_use]
    pub fn feature_enabled(&self, feature: &str) -> bool {
        if let Some(enabled) = self.features.get(feature) {
            return *enabled;
        }
        tracing::warn!(
            module = %self.name,
            feature,
            declared = ?self.features.keys().collect::<Vec<_>>(),
            "Feature not declared for module, reading as disabled"
        );
        false
    }
}

/// Builder for [`ModuleDescriptor`].
#[derive(Debug, Clone)]
#[must_use]
pub struct DescriptorBuilder {
    name: String,
    version: String,
    description: String,
    enabled: bool,
    dependencies: Vec<String>,
    route_prefix: Option<String>,
    features: BTreeMap<String, bool>,
}

impl DescriptorBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = Some(prefix.into());
        self
    }

    pub fn feature(mut self, feature: impl Into<String>, enabled: bool) -> Self {
        self.features.insert(feature.into(), enabled);
        self
    }

    /// Validate and produce the descriptor.
    ///
    /// # Errors
    /// Returns [`DescriptorError`] when the name or version is empty, the name
    /// has characters outside `[a-z0-9_-]`, a dependency is empty or repeated,
    /// the route prefix is malformed, or a feature name is empty.
    pub fn build(self) -> Result<ModuleDescriptor, DescriptorError> {
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(DescriptorError::EmptyName);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(DescriptorError::InvalidName { name });
        }
        if self.version.trim().is_empty() {
            return Err(DescriptorError::EmptyVersion { module: name });
        }

        let mut seen = std::collections::HashSet::new();
        for dependency in &self.dependencies {
            if dependency.trim().is_empty() {
                return Err(DescriptorError::EmptyDependency { module: name });
            }
            if !seen.insert(dependency.as_str()) {
                return Err(DescriptorError::DuplicateDependency {
                    module: name,
                    dependency: dependency.clone(),
                });
            }
        }

        if let Some(prefix) = &self.route_prefix
            && (!prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/'))
        {
            return Err(DescriptorError::InvalidRoutePrefix {
                module: name,
                prefix: prefix.clone(),
            });
        }

        if self.features.keys().any(|f| f.trim().is_empty()) {
            return Err(DescriptorError::EmptyFeature { module: name });
        }

        Ok(ModuleDescriptor {
            name,
            version: self.version,
            description: self.description,
            enabled: self.enabled,
            dependencies: self.dependencies,
            route_prefix: self.route_prefix,
            features: self.features,
        })
    }
}
