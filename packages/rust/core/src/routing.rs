//! Routing rule evaluation.

use leadforge_shared::{Answers, Priority, RoutingRules};

/// Evaluate `rules` against `answers` in declaration order.
///
/// Every matching rule appends its tag (duplicates kept); the first matching
/// rule that carries a priority sets it.
pub fn apply_routing_rules(rules: &RoutingRules, answers: &Answers) -> (Vec<String>, Option<Priority>) {
    let mut tags = Vec::new();
    let mut priority = None;

    for rule in &rules.rules {
        if answers.get(&rule.when.field) != Some(&rule.when.equals) {
            continue;
        }
        if let Some(tag) = &rule.then.tag {
            tags.push(tag.clone());
        }
        if priority.is_none() {
            priority = rule.then.priority;
        }
    }

    (tags, priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules(value: serde_json::Value) -> RoutingRules {
        serde_json::from_value(value).unwrap()
    }

    fn answers(value: serde_json::Value) -> Answers {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn first_priority_wins_and_tags_accumulate() {
        let rules = rules(json!({"rules": [
            {"when": {"field": "service", "equals": "solar"}, "then": {"tag": "solar", "priority": "high"}},
            {"when": {"field": "timeframe", "equals": "immediate"}, "then": {"tag": "hot", "priority": "low"}},
            {"when": {"field": "service", "equals": "solar"}, "then": {"tag": "solar"}},
        ]}));
        let (tags, priority) = apply_routing_rules(
            &rules,
            &answers(json!({"service": "solar", "timeframe": "immediate"})),
        );
        assert_eq!(tags, ["solar", "hot", "solar"]);
        assert_eq!(priority, Some(Priority::High));
    }

    #[test]
    fn priority_from_later_rule_when_earlier_has_none() {
        let rules = rules(json!({"rules": [
            {"when": {"field": "service", "equals": "roofing"}, "then": {"tag": "roof"}},
            {"when": {"field": "budget", "equals": 5000}, "then": {"priority": "medium"}},
        ]}));
        let (tags, priority) =
            apply_routing_rules(&rules, &answers(json!({"service": "roofing", "budget": 5000})));
        assert_eq!(tags, ["roof"]);
        assert_eq!(priority, Some(Priority::Medium));
    }

    #[test]
    fn equality_is_type_strict() {
        let rules = rules(json!({"rules": [
            {"when": {"field": "budget", "equals": 5000}, "then": {"tag": "big"}},
        ]}));
        let (tags, _) = apply_routing_rules(&rules, &answers(json!({"budget": "5000"})));
        assert!(tags.is_empty());
    }

    #[test]
    fn no_rules_or_no_match() {
        let empty = RoutingRules::default();
        assert_eq!(apply_routing_rules(&empty, &answers(json!({"a": 1}))), (vec![], None));

        let rules = rules(json!({"rules": [
            {"when": {"field": "service", "equals": "solar"}, "then": {"tag": "solar", "priority": "high"}},
        ]}));
        assert_eq!(apply_routing_rules(&rules, &Answers::new()), (vec![], None));
    }
}
