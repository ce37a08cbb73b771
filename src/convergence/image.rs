//! Image registry rewriting

use k8s_openapi::api::core::v1::LocalObjectReference;

/// Custom registry and repository taken from `customImageRegistry`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRegistry {
    pub registry: Option<String>,
    pub repository: Option<String>,
}

impl ImageRegistry {
    /// Parse a custom registry value.
    ///
    /// `host:port` is a registry only. `host:port/repo` sets both, where
    /// everything after the first `/` is the repository path.
    pub fn parse(custom: Option<&str>) -> Self {
        let Some(custom) = custom.map(|c| c.trim().trim_matches('/')).filter(|c| !c.is_empty())
        else {
            return Self::default();
        };

        match custom.split_once('/') {
            Some((registry, repository)) => Self {
                registry: Some(registry.to_string()),
                repository: Some(repository.to_string()),
            },
            None => Self {
                registry: Some(custom.to_string()),
                repository: None,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_none() && self.repository.is_none()
    }

    /// Rewrite an image reference.
    ///
    /// A repository replaces the image's path and keeps its last segment
    /// (`name:tag`); a registry prefixes the result.
    pub fn resolve(&self, image: &str) -> String {
        if image.is_empty() {
            return String::new();
        }

        let mut reference = match &self.repository {
            Some(repository) => {
                let name = image.rsplit('/').next().unwrap_or(image);
                format!("{}/{}", repository, name)
            }
            None => image.to_string(),
        };

        if let Some(registry) = &self.registry {
            let prefix = format!("{}/", registry);
            if !reference.starts_with(&prefix) {
                reference = format!("{}{}", prefix, reference);
            }
        }
        reference
    }
}

/// Pull secret list for a pod spec
pub fn pull_secrets(secret: Option<&str>) -> Option<Vec<LocalObjectReference>> {
    secret.filter(|s| !s.is_empty()).map(|name| {
        vec![LocalObjectReference {
            name: Some(name.to_string()),
        }]
    })
}
