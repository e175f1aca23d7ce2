//! Per-call options and queue-wide defaults.
//!
//! Calls accept a slice of small option values which are folded, in order,
//! over the queue defaults into a single settings struct and validated before
//! any statement is sent. Later options win.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::models::validate_namespace;
use crate::Result;

/// Default page size for `list`.
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Options accepted by `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOption {
    Namespace(String),
    /// Zero or negative falls back to the default limit.
    Limit(i64),
    /// Negative is treated as zero.
    Offset(i64),
}

impl ListOption {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        ListOption::Namespace(namespace.into())
    }
}

/// Options accepted by scoped calls: `len`, `min_created_at`, `truncate`, `shift`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeOption {
    Namespace(String),
}

impl ScopeOption {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        ScopeOption::Namespace(namespace.into())
    }
}

impl From<ScopeOption> for ListOption {
    fn from(opt: ScopeOption) -> Self {
        match opt {
            ScopeOption::Namespace(ns) => ListOption::Namespace(ns),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListSettings {
    pub namespace: String,
    pub limit: i64,
    pub offset: i64,
}

impl ListSettings {
    pub(crate) fn fold(defaults: &QueueOptions, opts: &[ListOption]) -> Result<Self> {
        let mut settings = Self {
            namespace: defaults.namespace.clone(),
            limit: defaults.list_limit,
            offset: 0,
        };
        for opt in opts {
            match opt {
                ListOption::Namespace(ns) => settings.namespace = ns.clone(),
                ListOption::Limit(limit) => settings.limit = *limit,
                ListOption::Offset(offset) => settings.offset = *offset,
            }
        }
        if settings.limit <= 0 {
            settings.limit = DEFAULT_LIST_LIMIT;
        }
        settings.offset = settings.offset.max(0);

        validate_namespace(&settings.namespace)?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScopeSettings {
    pub namespace: String,
}

impl ScopeSettings {
    pub(crate) fn fold(defaults: &QueueOptions, opts: &[ScopeOption]) -> Result<Self> {
        let mut settings = Self {
            namespace: defaults.namespace.clone(),
        };
        for opt in opts {
            match opt {
                ScopeOption::Namespace(ns) => settings.namespace = ns.clone(),
            }
        }

        validate_namespace(&settings.namespace)?;
        Ok(settings)
    }
}

/// Queue-wide configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Default scope for every call and for pushed tasks without a namespace.
    pub namespace: String,
    /// Default page size for `list`.
    pub list_limit: i64,
    /// Upper bound on how long a claim may stay unresolved. The store
    /// terminates the claim's session once it has been idle this long.
    pub claim_timeout: Option<Duration>,
    pub clock: Arc<dyn Clock>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            list_limit: DEFAULT_LIST_LIMIT,
            claim_timeout: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl QueueOptions {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_list_limit(mut self, limit: i64) -> Self {
        self.list_limit = limit;
        self
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = Some(timeout);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn list_defaults() {
        let settings = ListSettings::fold(&QueueOptions::default(), &[]).unwrap();
        assert_eq!(
            settings,
            ListSettings {
                namespace: String::new(),
                limit: 100,
                offset: 0,
            }
        );
    }

    #[test]
    fn list_options_fold_in_order() {
        let defaults = QueueOptions::default().with_namespace("foo");
        let settings = ListSettings::fold(
            &defaults,
            &[
                ListOption::namespace("bar"),
                ListOption::Limit(10),
                ListOption::Offset(20),
                ListOption::namespace("baz"),
            ],
        )
        .unwrap();
        assert_eq!(settings.namespace, "baz");
        assert_eq!(settings.limit, 10);
        assert_eq!(settings.offset, 20);
    }

    #[test]
    fn list_limit_and_offset_are_clamped() {
        let defaults = QueueOptions::default().with_list_limit(0);
        let settings =
            ListSettings::fold(&defaults, &[ListOption::Offset(-5)]).unwrap();
        assert_eq!(settings.limit, DEFAULT_LIST_LIMIT);
        assert_eq!(settings.offset, 0);

        let settings = ListSettings::fold(&defaults, &[ListOption::Limit(-1)]).unwrap();
        assert_eq!(settings.limit, DEFAULT_LIST_LIMIT);
    }

    #[test]
    fn scope_inherits_queue_namespace() {
        let defaults = QueueOptions::default().with_namespace("foo");
        let settings = ScopeSettings::fold(&defaults, &[]).unwrap();
        assert_eq!(settings.namespace, "foo");

        let settings = ScopeSettings::fold(&defaults, &[ScopeOption::namespace("")]).unwrap();
        assert_eq!(settings.namespace, "");
    }

    #[test]
    fn folded_namespace_is_validated() {
        let err = ScopeSettings::fold(&QueueOptions::default(), &[ScopeOption::namespace("日本国")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidNamespace(_)));

        let err = ListSettings::fold(&QueueOptions::default(), &[ListOption::namespace("ü")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidNamespace(_)));

        // A bad value overridden by a later option is fine.
        assert!(ListSettings::fold(
            &QueueOptions::default(),
            &[ListOption::namespace("ü"), ListOption::namespace("u")]
        )
        .is_ok());
    }

    #[test]
    fn scope_converts_to_list_option() {
        let opt: ListOption = ScopeOption::namespace("baz").into();
        assert_eq!(opt, ListOption::Namespace("baz".to_string()));
    }

    #[test]
    fn queue_options_validate_namespace() {
        assert!(QueueOptions::default().with_namespace("jobs").validate().is_ok());
        assert!(QueueOptions::default().with_namespace("jöbs").validate().is_err());
    }
}
