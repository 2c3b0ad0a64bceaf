use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Caching class assigned to every request. Exactly one per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    Navigation,
    ApiCall,
    Media,
    StyleOrScript,
    Default,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::ApiCall => "api_call",
            Self::Media => "media",
            Self::StyleOrScript => "style_or_script",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared destination of a request, as carried by `Sec-Fetch-Dest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Document,
    Image,
    Style,
    Font,
    Script,
    Other(String),
}

impl FromStr for Destination {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "document" => Self::Document,
            "image" => Self::Image,
            "style" => Self::Style,
            "font" => Self::Font,
            "script" => Self::Script,
            _ => Self::Other(normalized),
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => f.write_str("document"),
            Self::Image => f.write_str("image"),
            Self::Style => f.write_str("style"),
            Self::Font => f.write_str("font"),
            Self::Script => f.write_str("script"),
            Self::Other(value) => f.write_str(value),
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Runtime,
    Precache,
    Fallback,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Runtime => "runtime",
            Self::Precache => "precache",
            Self::Fallback => "fallback",
        }
    }
}
