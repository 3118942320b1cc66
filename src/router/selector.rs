//! Text-vs-image route selection.

use crate::config::RoutingConfig;

/// Upstream capability a chat turn is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Text,
    Image,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Text => "text",
            Route::Image => "image",
        }
    }
}

/// Classifies messages by substring membership in a fixed trigger list.
///
/// Not a classifier in any statistical sense: the first trigger found in the
/// lowercased message wins, and anything without a trigger is text.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    triggers: Vec<String>,
}

impl RouteClassifier {
    /// Create a classifier; triggers are lowercased once here.
    pub fn new(triggers: &[String]) -> Self {
        Self {
            triggers: triggers.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        Self::new(&config.image_triggers)
    }

    /// Pick the route for a message.
    pub fn classify(&self, message: &str) -> Route {
        let message_lower = message.to_lowercase();
        match self
            .triggers
            .iter()
            .find(|trigger| message_lower.contains(trigger.as_str()))
        {
            Some(trigger) => {
                tracing::debug!(trigger = %trigger, "Matched image trigger");
                Route::Image
            }
            None => Route::Text,
        }
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }
}
