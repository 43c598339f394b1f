//! Rule parsing: JSON tuples into sum types
//!
//! Parsing is strict so that `create`/`edit` can reject malformed
//! templates up front; anything that parses here is safe to evaluate.

use serde_json::Value;

use crate::world::perms::PermRule;

/// Head of a dotted reference path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefBase {
    Slf,
    Actor,
    Subject,
    Container,
    Carrier,
}

impl RefBase {
    fn parse(s: &str) -> Option<RefBase> {
        match s {
            "self" => Some(RefBase::Slf),
            "actor" => Some(RefBase::Actor),
            "subject" => Some(RefBase::Subject),
            "container" => Some(RefBase::Container),
            "carrier" => Some(RefBase::Carrier),
            _ => None,
        }
    }
}

/// A parsed reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `self`, `actor.username`, `container.FIELD`, ...
    Entity {
        base: RefBase,
        field: Option<String>,
    },
    /// `self.contents.t:TID.FIELD` / `carrier.contents.t:TID.FIELD`
    Contents {
        base: RefBase,
        template_id: String,
        field: String,
    },
    /// `tick.count`: seconds since UTC midnight
    TickCount,
}

impl Reference {
    pub fn parse(s: &str) -> Result<Reference, String> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.is_empty() || parts[0].is_empty() {
            return Err(format!("empty reference: {:?}", s));
        }

        if parts[0] == "tick" {
            if parts.len() == 2 && parts[1] == "count" {
                return Ok(Reference::TickCount);
            }
            return Err(format!("unknown tick reference: {:?}", s));
        }

        let base = RefBase::parse(parts[0])
            .ok_or_else(|| format!("unknown reference head: {:?}", parts[0]))?;

        if parts.len() >= 2 && parts[1] == "contents" {
            if !matches!(base, RefBase::Slf | RefBase::Carrier) {
                return Err(format!("contents reference needs self or carrier: {:?}", s));
            }
            if parts.len() != 4 {
                return Err(format!(
                    "contents reference must be <head>.contents.t:ID.FIELD: {:?}",
                    s
                ));
            }
            let template_id = parts[2]
                .strip_prefix("t:")
                .ok_or_else(|| format!("contents selector must start with t:: {:?}", parts[2]))?;
            if template_id.is_empty() || parts[3].is_empty() {
                return Err(format!("incomplete contents reference: {:?}", s));
            }
            return Ok(Reference::Contents {
                base,
                template_id: template_id.to_string(),
                field: parts[3].to_string(),
            });
        }

        match parts.len() {
            1 => Ok(Reference::Entity { base, field: None }),
            _ => Ok(Reference::Entity {
                base,
                // field names may themselves contain dots
                field: Some(parts[1..].join(".")),
            }),
        }
    }

    /// Writable targets for `set`/`add`
    pub fn is_writable_base(&self) -> bool {
        matches!(
            self,
            Reference::Entity {
                base: RefBase::Slf | RefBase::Subject | RefBase::Container,
                ..
            }
        )
    }
}

/// One condition of an `if` list
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Reference, Value),
    Neq(Reference, Value),
    Gt(Reference, Value),
    Lt(Reference, Value),
    /// `["has", ref, TID]`: some live instance of TID is contained in the
    /// entity the reference resolves to
    Has(Reference, String),
    Not(Box<Condition>),
}

/// One primitive effect
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Set { target: Reference, value: Value },
    Add { target: Reference, amount: Value },
    Say { text: String },
    Take { template_id: String, from: Reference },
    Give { template_id: String, to: Reference },
    Move { target: Reference, node: Value },
    Create { template_id: String, at: Reference },
    Destroy { target: Reference },
    Perm { target: Reference, key: String, rule: PermRule },
    Deny,
}

/// An entry of a `do`/`else` list: a primitive effect or a nested block
#[derive(Debug, Clone, PartialEq)]
pub enum EffectEntry {
    Primitive(Effect),
    Block(CondBlock),
}

/// Nested conditional block mirroring the rule shape
#[derive(Debug, Clone, PartialEq)]
pub struct CondBlock {
    pub conditions: Vec<Condition>,
    pub then_effects: Vec<EffectEntry>,
    pub else_effects: Vec<EffectEntry>,
}

/// One interaction rule
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRule {
    pub on: String,
    pub conditions: Vec<Condition>,
    pub then_effects: Vec<EffectEntry>,
    pub else_effects: Vec<EffectEntry>,
}

/// Parse a template's interaction list, rejecting unknown ops and keys
pub fn parse_rules(raw: &[Value]) -> Result<Vec<InteractionRule>, String> {
    raw.iter().map(parse_rule).collect()
}

fn parse_rule(value: &Value) -> Result<InteractionRule, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "interaction rule must be an object".to_string())?;

    for key in obj.keys() {
        if !matches!(key.as_str(), "on" | "if" | "do" | "else") {
            return Err(format!("unknown rule key: {:?}", key));
        }
    }

    let on = obj
        .get("on")
        .and_then(Value::as_str)
        .ok_or_else(|| "rule needs a string 'on' verb".to_string())?;
    if on.is_empty() {
        return Err("rule 'on' verb must not be empty".to_string());
    }

    let conditions = parse_condition_list(obj.get("if"))?;
    let then_effects = parse_effect_list(
        obj.get("do")
            .ok_or_else(|| "rule needs a 'do' list".to_string())?,
    )?;
    let else_effects = match obj.get("else") {
        Some(v) => parse_effect_list(v)?,
        None => Vec::new(),
    };

    Ok(InteractionRule {
        on: on.to_string(),
        conditions,
        then_effects,
        else_effects,
    })
}

fn parse_condition_list(value: Option<&Value>) -> Result<Vec<Condition>, String> {
    match value {
        None => Ok(Vec::new()),
        Some(v) => v
            .as_array()
            .ok_or_else(|| "'if' must be a list".to_string())?
            .iter()
            .map(parse_condition)
            .collect(),
    }
}

fn parse_condition(value: &Value) -> Result<Condition, String> {
    let items = value
        .as_array()
        .ok_or_else(|| "condition must be a tuple".to_string())?;
    let op = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| "condition op must be a string".to_string())?;

    match op {
        "eq" | "neq" | "gt" | "lt" => {
            if items.len() != 3 {
                return Err(format!("{} condition takes a reference and a literal", op));
            }
            let reference = parse_reference_arg(&items[1])?;
            let literal = items[2].clone();
            Ok(match op {
                "eq" => Condition::Eq(reference, literal),
                "neq" => Condition::Neq(reference, literal),
                "gt" => Condition::Gt(reference, literal),
                _ => Condition::Lt(reference, literal),
            })
        }
        "has" => {
            if items.len() != 3 {
                return Err("has condition takes a reference and a template id".to_string());
            }
            let reference = parse_reference_arg(&items[1])?;
            let template_id = items[2]
                .as_str()
                .ok_or_else(|| "has template id must be a string".to_string())?;
            Ok(Condition::Has(reference, template_id.to_string()))
        }
        "not" => {
            if items.len() != 2 {
                return Err("not condition takes one inner condition".to_string());
            }
            Ok(Condition::Not(Box::new(parse_condition(&items[1])?)))
        }
        other => Err(format!("unknown condition op: {:?}", other)),
    }
}

fn parse_effect_list(value: &Value) -> Result<Vec<EffectEntry>, String> {
    value
        .as_array()
        .ok_or_else(|| "effect list must be a list".to_string())?
        .iter()
        .map(parse_effect_entry)
        .collect()
}

fn parse_effect_entry(value: &Value) -> Result<EffectEntry, String> {
    if let Some(obj) = value.as_object() {
        // nested conditional block
        for key in obj.keys() {
            if !matches!(key.as_str(), "if" | "do" | "else") {
                return Err(format!("unknown block key: {:?}", key));
            }
        }
        let conditions = parse_condition_list(obj.get("if"))?;
        let then_effects = parse_effect_list(
            obj.get("do")
                .ok_or_else(|| "block needs a 'do' list".to_string())?,
        )?;
        let else_effects = match obj.get("else") {
            Some(v) => parse_effect_list(v)?,
            None => Vec::new(),
        };
        return Ok(EffectEntry::Block(CondBlock {
            conditions,
            then_effects,
            else_effects,
        }));
    }

    parse_effect(value).map(EffectEntry::Primitive)
}

fn parse_effect(value: &Value) -> Result<Effect, String> {
    let items = value
        .as_array()
        .ok_or_else(|| "effect must be a tuple".to_string())?;
    let op = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| "effect op must be a string".to_string())?;

    match op {
        "set" | "add" => {
            if items.len() != 3 {
                return Err(format!("{} effect takes a reference and a value", op));
            }
            let target = parse_reference_arg(&items[1])?;
            if !target.is_writable_base() {
                return Err(format!("{} target must be self, subject or container", op));
            }
            if matches!(target, Reference::Entity { field: None, .. }) {
                return Err(format!("{} target must name a field", op));
            }
            Ok(if op == "set" {
                Effect::Set {
                    target,
                    value: items[2].clone(),
                }
            } else {
                Effect::Add {
                    target,
                    amount: items[2].clone(),
                }
            })
        }
        "say" => {
            if items.len() != 2 {
                return Err("say effect takes a text".to_string());
            }
            let text = items[1]
                .as_str()
                .ok_or_else(|| "say text must be a string".to_string())?;
            Ok(Effect::Say {
                text: text.to_string(),
            })
        }
        "take" | "give" => {
            if items.len() != 3 {
                return Err(format!("{} effect takes a template id and a reference", op));
            }
            let template_id = items[1]
                .as_str()
                .ok_or_else(|| format!("{} template id must be a string", op))?
                .to_string();
            let reference = parse_reference_arg(&items[2])?;
            Ok(if op == "take" {
                Effect::Take {
                    template_id,
                    from: reference,
                }
            } else {
                Effect::Give {
                    template_id,
                    to: reference,
                }
            })
        }
        "move" => {
            if items.len() != 3 {
                return Err("move effect takes a reference and a node".to_string());
            }
            Ok(Effect::Move {
                target: parse_reference_arg(&items[1])?,
                node: items[2].clone(),
            })
        }
        "create" => {
            if items.len() != 3 {
                return Err("create effect takes a template id and a reference".to_string());
            }
            let template_id = items[1]
                .as_str()
                .ok_or_else(|| "create template id must be a string".to_string())?
                .to_string();
            Ok(Effect::Create {
                template_id,
                at: parse_reference_arg(&items[2])?,
            })
        }
        "destroy" => {
            if items.len() != 2 {
                return Err("destroy effect takes a reference".to_string());
            }
            Ok(Effect::Destroy {
                target: parse_reference_arg(&items[1])?,
            })
        }
        "perm" => {
            if items.len() != 4 {
                return Err("perm effect takes a reference, a key and a rule".to_string());
            }
            let target = parse_reference_arg(&items[1])?;
            let key = items[2]
                .as_str()
                .ok_or_else(|| "perm key must be a string".to_string())?
                .to_string();
            let rule = PermRule::parse(&items[3])
                .ok_or_else(|| format!("invalid permission rule: {}", items[3]))?;
            Ok(Effect::Perm { target, key, rule })
        }
        "deny" => {
            if items.len() != 1 {
                return Err("deny effect takes no arguments".to_string());
            }
            Ok(Effect::Deny)
        }
        other => Err(format!("unknown effect op: {:?}", other)),
    }
}

fn parse_reference_arg(value: &Value) -> Result<Reference, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("expected a reference string, got {}", value))?;
    Reference::parse(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_references() {
        assert_eq!(
            Reference::parse("self").unwrap(),
            Reference::Entity {
                base: RefBase::Slf,
                field: None
            }
        );
        assert_eq!(
            Reference::parse("actor.username").unwrap(),
            Reference::Entity {
                base: RefBase::Actor,
                field: Some("username".into())
            }
        );
        assert_eq!(Reference::parse("tick.count").unwrap(), Reference::TickCount);
        assert_eq!(
            Reference::parse("self.contents.t:tpl-1.charge").unwrap(),
            Reference::Contents {
                base: RefBase::Slf,
                template_id: "tpl-1".into(),
                field: "charge".into()
            }
        );
    }

    #[test]
    fn test_parse_reference_rejects_garbage() {
        assert!(Reference::parse("world").is_err());
        assert!(Reference::parse("tick.seconds").is_err());
        assert!(Reference::parse("actor.contents.t:x.y").is_err());
        assert!(Reference::parse("self.contents.x.y").is_err());
        assert!(Reference::parse("").is_err());
    }

    #[test]
    fn test_parse_full_rule() {
        let raw = json!({
            "on": "travel",
            "if": [["eq", "self.locked", true]],
            "do": [["say", "locked"], ["deny"]],
            "else": [["set", "self.last_used", "open"]]
        });
        let rules = parse_rules(&[raw]).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].on, "travel");
        assert_eq!(rules[0].conditions.len(), 1);
        assert_eq!(rules[0].then_effects.len(), 2);
        assert_eq!(rules[0].else_effects.len(), 1);
        assert!(matches!(
            rules[0].then_effects[1],
            EffectEntry::Primitive(Effect::Deny)
        ));
    }

    #[test]
    fn test_parse_nested_block() {
        let raw = json!({
            "on": "poke",
            "do": [
                {"if": [["gt", "self.count", 3]], "do": [["say", "enough"]]},
                ["add", "self.count", 1]
            ]
        });
        let rules = parse_rules(&[raw]).unwrap();
        assert!(matches!(rules[0].then_effects[0], EffectEntry::Block(_)));
    }

    #[test]
    fn test_reject_unknown_ops_and_keys() {
        assert!(parse_rules(&[json!({"on": "x", "do": [["explode"]]})]).is_err());
        assert!(parse_rules(&[json!({"on": "x", "do": [], "when": []})]).is_err());
        assert!(parse_rules(&[json!({"on": "x"})]).is_err());
        assert!(parse_rules(&[json!({"on": "x", "do": [["set", "actor.hp", 0]]})]).is_err());
        assert!(parse_rules(&[json!({"on": "x", "do": [["perm", "self", "edit", "everyone"]]})])
            .is_err());
    }
}
