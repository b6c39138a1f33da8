//! Visit classification.
//!
//! Derives a coarse [`DeviceType`] and a [`Browser`] family from an opaque
//! user-agent string. Classification is total: every input yields a valid
//! result, defaulting to desktop / unknown.
//!
//! # Device policy
//!
//! The authoritative rule matches user-agent signatures, tablet first:
//!
//! 1. tablet: `tablet`, `ipad`, `playbook`, `silk`, or `android` without `mobi`
//! 2. mobile: `mobile`, `android`, `iphone`, `ipod`, `iemobile`, `blackberry`,
//!    `kindle`, `opera mini`, `opera mobi`, `webos`, `windows phone`
//! 3. desktop otherwise
//!
//! A viewport-width rule (`< 768` mobile, `< 1024` tablet) is available as
//! [`DevicePolicy::ViewportWidth`]. A [`Classifier`] applies exactly one of
//! the two; they disagree on real devices (a narrow desktop window) and are
//! never combined.
//!
//! # Browser priority
//!
//! Case-sensitive substring match, first hit wins: Firefox, Opera/OPR,
//! Trident, Edg (desktop `Edge`/`Edg`, Android `EdgA`, iOS `EdgiOS`), Chrome,
//! Safari. Edge and Chrome user agents also carry the `Chrome` and `Safari`
//! tokens, so the order is load-bearing.

use serde::{Deserialize, Serialize};

use crate::models::{Browser, DeviceType};

const TABLET_SIGNATURES: &[&str] = &["tablet", "ipad", "playbook", "silk"];

const MOBILE_SIGNATURES: &[&str] = &[
    "mobile",
    "android",
    "iphone",
    "ipod",
    "iemobile",
    "blackberry",
    "kindle",
    "opera mini",
    "opera mobi",
    "webos",
    "windows phone",
];

const BROWSER_RULES: &[(&[&str], Browser)] = &[
    (&["Firefox"], Browser::Firefox),
    (&["Opera", "OPR"], Browser::Opera),
    (&["Trident"], Browser::Ie),
    (&["Edg"], Browser::Edge),
    (&["Chrome"], Browser::Chrome),
    (&["Safari"], Browser::Safari),
];

/// Viewports narrower than this are mobile under the width policy.
pub const MOBILE_MAX_WIDTH: u32 = 768;
/// Viewports narrower than this (and not mobile) are tablets under the width policy.
pub const TABLET_MAX_WIDTH: u32 = 1024;

/// Which rule decides the device category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePolicy {
    #[default]
    UserAgent,
    ViewportWidth,
}

/// Result of classifying one visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub device_type: DeviceType,
    pub browser: Browser,
}

/// Classifier bound to a single device policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    policy: DevicePolicy,
}

impl Classifier {
    pub fn with_policy(policy: DevicePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DevicePolicy {
        self.policy
    }

    pub fn classify(&self, user_agent: &str, viewport_width: u32) -> Classification {
        let device_type = match self.policy {
            DevicePolicy::UserAgent => device_from_user_agent(user_agent),
            DevicePolicy::ViewportWidth => device_from_width(viewport_width),
        };
        Classification {
            device_type,
            browser: browser_from_user_agent(user_agent),
        }
    }
}

/// Classify with the default (user-agent) device policy.
pub fn classify(user_agent: &str, viewport_width: u32) -> Classification {
    Classifier::default().classify(user_agent, viewport_width)
}

pub fn device_from_user_agent(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_lowercase();

    let tablet = TABLET_SIGNATURES.iter().any(|sig| ua.contains(sig))
        || (ua.contains("android") && !ua.contains("mobi"));
    if tablet {
        return DeviceType::Tablet;
    }

    if MOBILE_SIGNATURES.iter().any(|sig| ua.contains(sig)) {
        return DeviceType::Mobile;
    }

    DeviceType::Desktop
}

pub fn device_from_width(viewport_width: u32) -> DeviceType {
    if viewport_width < MOBILE_MAX_WIDTH {
        DeviceType::Mobile
    } else if viewport_width < TABLET_MAX_WIDTH {
        DeviceType::Tablet
    } else {
        DeviceType::Desktop
    }
}

pub fn browser_from_user_agent(user_agent: &str) -> Browser {
    BROWSER_RULES
        .iter()
        .find(|(tokens, _)| tokens.iter().any(|t| user_agent.contains(t)))
        .map(|(_, browser)| *browser)
        .unwrap_or(Browser::Unknown)
}
