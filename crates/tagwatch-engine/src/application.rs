//! Applications: named groups of tracked images.

use serde::{Deserialize, Serialize};

use tagwatch_core::ImagePolicy;

/// One application and the image policies it tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// Application name, used in logs and results.
    pub name: String,

    /// Per-image update policies.
    #[serde(default)]
    pub policies: Vec<ImagePolicy>,
}

impl Application {
    /// Creates an application with no policies.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policies: Vec::new(),
        }
    }

    /// Adds an image policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ImagePolicy) -> Self {
        self.policies.push(policy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagwatch_core::ContainerImage;

    #[test]
    fn test_builder() {
        let app = Application::new("guestbook").with_policy(ImagePolicy::new(
            ContainerImage::parse("ghcr.io/org/guestbook:1.0.0").unwrap(),
        ));
        assert_eq!(app.name, "guestbook");
        assert_eq!(app.policies.len(), 1);
    }
}
