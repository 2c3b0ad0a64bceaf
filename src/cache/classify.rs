//! Request classification.

use axum::http::Method;
use url::{Origin, Url};

use crate::domain::request::RequestMeta;
use crate::domain::types::{Destination, RequestClass};

/// Configurable rule table for the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRules {
    /// Path prefix identifying API calls.
    pub api_prefix: String,
    /// Extensions (without dot) that mark a request as media.
    pub image_extensions: Vec<String>,
    /// Extensions (without dot) that mark a request as a stylesheet, script or font.
    pub style_extensions: Vec<String>,
    /// Treat API-shaped requests to other origins as API calls too.
    pub cross_origin_api: bool,
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            image_extensions: ["png", "jpg", "jpeg", "svg", "gif", "webp", "ico"]
                .map(String::from)
                .to_vec(),
            style_extensions: ["css", "js", "woff", "woff2"].map(String::from).to_vec(),
            cross_origin_api: false,
        }
    }
}

/// Maps a request to exactly one [`RequestClass`].
///
/// Rules are checked in priority order and the first match wins:
/// navigation, API call, media, style or script, then the default class.
/// Classification has no state; the same request always yields the same class.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Origin,
    rules: ClassifierRules,
}

impl Classifier {
    pub fn new(serving_origin: &Url, rules: ClassifierRules) -> Self {
        Self {
            origin: serving_origin.origin(),
            rules,
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    pub fn classify(&self, request: &RequestMeta) -> RequestClass {
        if self.is_navigation(request) {
            RequestClass::Navigation
        } else if self.is_api_call(request) {
            RequestClass::ApiCall
        } else if self.is_media(request) {
            RequestClass::Media
        } else if self.is_style_or_script(request) {
            RequestClass::StyleOrScript
        } else {
            RequestClass::Default
        }
    }

    fn is_navigation(&self, request: &RequestMeta) -> bool {
        *request.method() == Method::GET
            && (request.is_navigation()
                || request
                    .accept()
                    .is_some_and(|accept| accept.contains("text/html")))
    }

    fn is_api_call(&self, request: &RequestMeta) -> bool {
        (self.rules.cross_origin_api || request.is_same_origin(&self.origin))
            && request.path().starts_with(&self.rules.api_prefix)
    }

    fn is_media(&self, request: &RequestMeta) -> bool {
        matches!(request.destination(), Some(Destination::Image))
            || has_extension(request.path(), &self.rules.image_extensions)
    }

    fn is_style_or_script(&self, request: &RequestMeta) -> bool {
        matches!(
            request.destination(),
            Some(Destination::Style | Destination::Font | Destination::Script)
        ) || has_extension(request.path(), &self.rules.style_extensions)
    }
}

/// Extension of the last path segment, compared case-insensitively.
fn has_extension(path: &str, extensions: &[String]) -> bool {
    let segment = path.rsplit('/').next().unwrap_or(path);
    segment.rsplit_once('.').is_some_and(|(_, extension)| {
        extensions
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(extension))
    })
}
