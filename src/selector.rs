//! Decides which containers are in scope, and in which mode.

use crate::engine::Container;
use std::collections::HashMap;

/// Canonical watcher label namespace; kept for drop-in compatibility and
/// wins over the product namespace on conflict.
pub const CANONICAL_LABEL_NS: &str = "com.centurylinklabs.watchtower";
pub const PRODUCT_LABEL_NS: &str = "ing.wik.watchz";

const LABEL_ENABLE: &str = "enable";
const LABEL_MONITOR_ONLY: &str = "monitor-only";
const LABEL_NO_PULL: &str = "no-pull";
const LABEL_SCOPE: &str = "scope";
const LABEL_STOP_SIGNAL: &str = "stop-signal";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub watch: bool,
    pub monitor_only: bool,
    pub no_pull: bool,
    pub stop_signal: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Selector {
    /// Explicit container names; empty means every container is a candidate.
    pub names: Vec<String>,
    /// Only containers labeled `enable=true` are candidates.
    pub label_enable: bool,
    pub scope: Option<String>,
    pub monitor_only: bool,
    pub no_pull: bool,
}

impl Selector {
    /// First rule that eliminates wins; the order is part of the contract.
    pub fn select(&self, container: &Container) -> Selection {
        let name = container.name.trim_start_matches('/');

        if !self.names.is_empty()
            && !self.names.iter().any(|n| n.trim_start_matches('/') == name)
        {
            return Selection::default();
        }

        let enable = label(&container.labels, LABEL_ENABLE);
        if self.label_enable && enable != Some("true") {
            return Selection::default();
        }
        if enable == Some("false") {
            return Selection::default();
        }

        if let Some(scope) = &self.scope
            && label(&container.labels, LABEL_SCOPE) != Some(scope.as_str())
        {
            return Selection::default();
        }

        Selection {
            watch: true,
            monitor_only: self.monitor_only
                || label(&container.labels, LABEL_MONITOR_ONLY) == Some("true"),
            no_pull: self.no_pull || label(&container.labels, LABEL_NO_PULL) == Some("true"),
            stop_signal: label(&container.labels, LABEL_STOP_SIGNAL).map(str::to_string),
        }
    }
}

fn label<'a>(labels: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    labels
        .get(&format!("{CANONICAL_LABEL_NS}.{name}"))
        .or_else(|| labels.get(&format!("{PRODUCT_LABEL_NS}.{name}")))
        .map(String::as_str)
}
