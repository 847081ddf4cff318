//! Decisions and check results.

use std::collections::BTreeMap;

use crate::types::{Action, AttributeValue};

/// The outcome for one (principal, resource, action) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Decision {
    /// The action is permitted.
    Allow,
    /// The action is not permitted.
    Deny,
}

impl Decision {
    /// Returns `true` for `Allow`.
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Any effect other than an explicit ALLOW is a denial, including
    /// `NO_MATCH` and unrecognised values.
    pub(crate) fn from_effect(effect: i32) -> Self {
        match crate::proto::Effect::try_from(effect) {
            Ok(crate::proto::Effect::Allow) => Decision::Allow,
            _ => Decision::Deny,
        }
    }
}

/// Which side of the request a schema validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationSource {
    /// The principal attributes failed schema validation.
    Principal,
    /// The resource attributes failed schema validation.
    Resource,
    /// The PDP did not say.
    Unspecified,
}

/// A schema validation error reported by the PDP for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidationError {
    /// JSON path of the offending attribute.
    pub path: String,
    /// Human-readable reason.
    pub message: String,
    /// Whether the principal or the resource was at fault.
    pub source: ValidationSource,
}

impl From<crate::proto::ValidationError> for ValidationError {
    fn from(proto: crate::proto::ValidationError) -> Self {
        let source = match crate::proto::ValidationErrorSource::try_from(proto.source) {
            Ok(crate::proto::ValidationErrorSource::Principal) => ValidationSource::Principal,
            Ok(crate::proto::ValidationErrorSource::Resource) => ValidationSource::Resource,
            _ => ValidationSource::Unspecified,
        };
        Self {
            path: proto.path,
            message: proto.message,
            source,
        }
    }
}

/// The answer to one [`CheckRequest`](crate::CheckRequest).
///
/// Holds one [`Decision`] per requested action, plus any schema validation
/// errors and rule outputs. Validation errors apply to the whole request and
/// suppress the per-action decisions: when present, [`decision`](Self::decision)
/// returns `None` and [`is_allowed`](Self::is_allowed) returns `false` for
/// every action.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckResult {
    decisions: BTreeMap<Action, Decision>,
    validation_errors: Vec<ValidationError>,
    outputs: BTreeMap<String, AttributeValue>,
}

impl CheckResult {
    /// Creates a result from action decisions.
    pub fn from_decisions(decisions: impl IntoIterator<Item = (Action, Decision)>) -> Self {
        Self {
            decisions: decisions.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Creates a result that failed schema validation.
    pub fn invalid(errors: Vec<ValidationError>) -> Self {
        Self {
            validation_errors: errors,
            ..Self::default()
        }
    }

    /// Adds a rule output.
    pub fn with_output(mut self, source: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.outputs.insert(source.into(), value.into());
        self
    }

    /// Returns the decision for `action`.
    ///
    /// `None` if the action was not part of the request or if the request
    /// failed validation.
    pub fn decision(&self, action: &str) -> Option<Decision> {
        if self.has_validation_errors() {
            return None;
        }
        self.decisions.get(action).copied()
    }

    /// Returns `true` only if `action` was explicitly allowed.
    pub fn is_allowed(&self, action: &str) -> bool {
        self.decision(action).is_some_and(Decision::is_allowed)
    }

    /// Iterates over every action and its decision, in action order.
    ///
    /// Empty when the request failed validation.
    pub fn decisions(&self) -> impl Iterator<Item = (&Action, Decision)> + '_ {
        let suppressed = self.has_validation_errors();
        self.decisions
            .iter()
            .filter(move |_| !suppressed)
            .map(|(a, d)| (a, *d))
    }

    /// Returns `true` if the PDP reported schema validation errors.
    pub fn has_validation_errors(&self) -> bool {
        !self.validation_errors.is_empty()
    }

    /// Returns the schema validation errors.
    pub fn validation_errors(&self) -> &[ValidationError] {
        &self.validation_errors
    }

    /// Returns rule outputs keyed by source rule.
    pub fn outputs(&self) -> &BTreeMap<String, AttributeValue> {
        &self.outputs
    }

    /// Only plain decisions are memoized: no validation errors, no outputs.
    pub(crate) fn is_cacheable(&self) -> bool {
        self.validation_errors.is_empty() && self.outputs.is_empty()
    }

    /// Adds decisions served from elsewhere (the cache) without overriding
    /// any the PDP returned.
    pub(crate) fn merge_decisions(&mut self, decisions: &BTreeMap<Action, Decision>) {
        for (action, decision) in decisions {
            self.decisions.entry(action.clone()).or_insert(*decision);
        }
    }

    pub(crate) fn from_proto(entry: crate::proto::ResultEntry) -> Self {
        let decisions = entry
            .actions
            .into_iter()
            .filter_map(|(name, effect)| {
                Action::new(name)
                    .ok()
                    .map(|action| (action, Decision::from_effect(effect)))
            })
            .collect();
        let outputs = entry
            .outputs
            .into_iter()
            .map(|o| (o.src, o.val.map(Into::into).unwrap_or(AttributeValue::Null)))
            .collect();
        Self {
            decisions,
            validation_errors: entry.validation_errors.into_iter().map(Into::into).collect(),
            outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(name: &str) -> Action {
        Action::new(name).unwrap()
    }

    #[test]
    fn effect_mapping() {
        assert_eq!(Decision::from_effect(1), Decision::Allow);
        assert_eq!(Decision::from_effect(2), Decision::Deny);
        assert_eq!(Decision::from_effect(3), Decision::Deny);
        assert_eq!(Decision::from_effect(0), Decision::Deny);
        assert_eq!(Decision::from_effect(99), Decision::Deny);
    }

    #[test]
    fn decisions_by_action() {
        let r = CheckResult::from_decisions([
            (action("read"), Decision::Allow),
            (action("write"), Decision::Deny),
        ]);
        assert!(r.is_allowed("read"));
        assert!(!r.is_allowed("write"));
        assert!(!r.is_allowed("delete"));
        assert_eq!(r.decision("write"), Some(Decision::Deny));
        assert_eq!(r.decision("delete"), None);
        assert_eq!(r.decisions().count(), 2);
    }

    #[test]
    fn validation_errors_suppress_decisions() {
        let mut r = CheckResult::invalid(vec![ValidationError {
            path: "/department".into(),
            message: "expected string".into(),
            source: ValidationSource::Principal,
        }]);
        r.merge_decisions(&BTreeMap::from([(action("read"), Decision::Allow)]));
        assert!(r.has_validation_errors());
        assert_eq!(r.decision("read"), None);
        assert!(!r.is_allowed("read"));
        assert_eq!(r.decisions().count(), 0);
        assert!(!r.is_cacheable());
    }

    #[test]
    fn merge_keeps_pdp_answer() {
        let mut r = CheckResult::from_decisions([(action("read"), Decision::Deny)]);
        r.merge_decisions(&BTreeMap::from([
            (action("read"), Decision::Allow),
            (action("write"), Decision::Allow),
        ]));
        assert_eq!(r.decision("read"), Some(Decision::Deny));
        assert_eq!(r.decision("write"), Some(Decision::Allow));
    }

    #[test]
    fn from_proto_entry() {
        let entry = crate::proto::ResultEntry {
            resource: None,
            actions: [
                ("view:public".to_string(), crate::proto::Effect::Allow as i32),
                ("approve".to_string(), crate::proto::Effect::NoMatch as i32),
            ]
            .into_iter()
            .collect(),
            validation_errors: vec![],
            outputs: vec![crate::proto::OutputEntry {
                src: "resource.leave_request.v20210210#rule-1".into(),
                val: Some((&AttributeValue::from("granted")).into()),
            }],
        };
        let r = CheckResult::from_proto(entry);
        assert!(r.is_allowed("view:public"));
        assert_eq!(r.decision("approve"), Some(Decision::Deny));
        assert_eq!(r.outputs().len(), 1);
        assert!(!r.is_cacheable());
    }

    #[test]
    fn validation_source_mapping() {
        let e: ValidationError = crate::proto::ValidationError {
            path: "/x".into(),
            message: "bad".into(),
            source: 2,
        }
        .into();
        assert_eq!(e.source, ValidationSource::Resource);
    }
}
