//! The base `wollok.lang` environment every [`crate::vm::Evaluation`] is built against:
//! the handful of classes the VM resolves by fixed FQN (`Object`, `Boolean`, `Number`,
//! `String`, `List`, `Set`, `Closure`, `Exception`, `EvaluationError`,
//! `StackOverflowException`), plus a matching [`NativeTable`] wiring their native
//! methods to real Rust.
//!
//! This module builds `wollok.lang` the same way an external parser would hand any
//! other package to [`link`]: as a [`ParsedPackage`] tree. The standard library's own
//! source is out of scope for this crate; what is here exists only to give the linker
//! and VM a base [`Environment`] with somewhere to resolve `wollok.lang.*` against, and
//! enough native behavior to exercise it.

use crate::{
    linker::link,
    natives::NativeTable,
    node::{Environment, Node, NodeId, NodeMeta, Package},
    parsed::{ParsedMember, ParsedNode, ParsedPackage, ParsedParameter},
    runtime::{Inner, InstanceId},
    vm::{Evaluation, RunResult},
};

fn param(name: &str) -> ParsedParameter {
    ParsedParameter {
        name: name.to_owned(),
        variadic: false,
        source_map: None,
    }
}

fn native(name: &str, params: &[&str]) -> ParsedMember {
    ParsedMember::Method {
        name: name.to_owned(),
        parameters: params.iter().map(|p| param(p)).collect(),
        body: None,
        is_native: true,
    }
}

fn field(name: &str, writable: bool) -> ParsedMember {
    ParsedMember::Field {
        name: name.to_owned(),
        initializer: None,
        writable,
    }
}

fn ctor(params: &[&str], body: Vec<ParsedNode>) -> ParsedMember {
    ParsedMember::Constructor {
        parameters: params.iter().map(|p| param(p)).collect(),
        base_call: None,
        body,
    }
}

fn class(name: &str, superclass: Option<&str>, members: Vec<ParsedMember>) -> ParsedNode {
    ParsedNode::Class {
        name: name.to_owned(),
        superclass: superclass.map(str::to_owned),
        mixins: Vec::new(),
        members,
    }
}

fn reference(name: &str) -> ParsedNode {
    ParsedNode::Reference { name: name.to_owned() }
}

fn assign(target: &str, value: ParsedNode) -> ParsedNode {
    ParsedNode::Assignment {
        reference: target.to_owned(),
        value: Box::new(value),
    }
}

/// A linked environment with one empty root package and nothing else, the seed
/// [`link`] needs before anything has been attached to it.
fn empty_environment() -> Environment {
    Environment {
        nodes: vec![Node::Package(Package {
            name: String::new(),
            members: Vec::new(),
            imports: Vec::new(),
        })],
        meta: vec![NodeMeta::default()],
        root_package: NodeId(0),
    }
}

fn wollok_lang() -> ParsedPackage {
    let object = class("Object", None, vec![ctor(&[], Vec::new()), native("==", &["other"]), native("!=", &["other"]), native("toString", &[])]);

    let boolean = class(
        "Boolean",
        Some("Object"),
        vec![
            ctor(&[], Vec::new()),
            native("&&", &["other"]),
            native("||", &["other"]),
            native("negate", &[]),
            native("==", &["other"]),
            native("toString", &[]),
        ],
    );

    let number = class(
        "Number",
        Some("Object"),
        vec![
            ctor(&[], Vec::new()),
            native("+", &["other"]),
            native("-", &["other"]),
            native("*", &["other"]),
            native("/", &["other"]),
            native("%", &["other"]),
            native("<", &["other"]),
            native(">", &["other"]),
            native("<=", &["other"]),
            native(">=", &["other"]),
            native("==", &["other"]),
            native("toString", &[]),
        ],
    );

    let string = class(
        "String",
        Some("Object"),
        vec![
            ctor(&[], Vec::new()),
            native("+", &["other"]),
            native("==", &["other"]),
            native("length", &[]),
            native("toString", &[]),
        ],
    );

    let list = class(
        "List",
        Some("Object"),
        vec![
            ctor(&[], Vec::new()),
            native("add", &["element"]),
            native("size", &[]),
            native("get", &["index"]),
            native("toString", &[]),
        ],
    );

    let set = class(
        "Set",
        Some("Object"),
        vec![ctor(&[], Vec::new()), native("add", &["element"]), native("size", &[]), native("toString", &[])],
    );

    let closure = class("Closure", Some("Object"), vec![ctor(&[], Vec::new())]);

    let exception = class(
        "Exception",
        Some("Object"),
        vec![
            field("message", true),
            ctor(&["msg"], vec![assign("message", reference("msg"))]),
            native("getMessage", &[]),
            native("toString", &[]),
        ],
    );

    let evaluation_error = class("EvaluationError", Some("Exception"), vec![ctor(&[], Vec::new())]);
    let stack_overflow = class("StackOverflowException", Some("Exception"), vec![ctor(&[], Vec::new())]);

    ParsedPackage {
        name: "lang".to_owned(),
        imports: Vec::new(),
        members: vec![object, boolean, number, string, list, set, closure, exception, evaluation_error, stack_overflow],
        source_map: None,
    }
}

/// Builds the base `Environment` every user `Environment` links on top of: a single
/// `wollok` package holding `wollok.lang` and its well-known classes.
///
/// # Panics
/// Panics if the hand-built `wollok.lang` package fails to link; that can only happen
/// if this module itself is inconsistent (a typo'd superclass name, a dangling
/// reference), never as a consequence of user input.
#[must_use]
pub fn base_environment() -> Environment {
    let wollok = ParsedPackage {
        name: "wollok".to_owned(),
        imports: Vec::new(),
        members: vec![ParsedNode::Package(Box::new(wollok_lang()))],
        source_map: None,
    };
    link(vec![wollok], empty_environment()).expect("wollok.lang standard library failed to link")
}

fn number_value(eval: &Evaluation, id: InstanceId) -> f64 {
    match &eval.instances().get(id).inner {
        Some(Inner::Number(raw)) => raw.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn string_value<'a>(eval: &'a Evaluation, id: InstanceId) -> Option<&'a str> {
    match &eval.instances().get(id).inner {
        Some(Inner::String(value)) => Some(value.as_str()),
        _ => None,
    }
}

fn expect_bool(eval: &mut Evaluation, id: InstanceId) -> RunResult<bool> {
    if id == eval.bool_id(true) {
        Ok(true)
    } else if id == eval.bool_id(false) {
        Ok(false)
    } else {
        Err(eval.raise_evaluation_error("expected a Boolean"))
    }
}

fn expect_string(eval: &mut Evaluation, id: InstanceId) -> RunResult<String> {
    string_value(eval, id).map(str::to_owned).ok_or_else(|| eval.raise_evaluation_error("expected a String"))
}

/// Identity first (which already covers every interned `Number`/`String` pair with
/// equal value), falling back to a value comparison for the rare non-interned case.
fn natural_equals(eval: &Evaluation, a: InstanceId, b: InstanceId) -> bool {
    if a == b {
        return true;
    }
    match (&eval.instances().get(a).inner, &eval.instances().get(b).inner) {
        (Some(Inner::Number(x)), Some(Inner::Number(y))) => x == y,
        (Some(Inner::String(x)), Some(Inner::String(y))) => x == y,
        _ => false,
    }
}

fn object_eq(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let result = natural_equals(eval, receiver, args[0]);
    let value = eval.bool_id(result);
    eval.push_current(value);
    Ok(())
}

fn object_neq(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let result = !natural_equals(eval, receiver, args[0]);
    let value = eval.bool_id(result);
    eval.push_current(value);
    Ok(())
}

fn object_to_string(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let module = eval.instances().get(receiver).module;
    let name = eval.environment().node(module).simple_name().unwrap_or("Object").to_owned();
    let value = eval.intern_string(&format!("a {name}"));
    eval.push_current(value);
    Ok(())
}

fn boolean_and(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let result = expect_bool(eval, receiver)? && expect_bool(eval, args[0])?;
    let value = eval.bool_id(result);
    eval.push_current(value);
    Ok(())
}

fn boolean_or(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let result = expect_bool(eval, receiver)? || expect_bool(eval, args[0])?;
    let value = eval.bool_id(result);
    eval.push_current(value);
    Ok(())
}

fn boolean_negate(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let result = !expect_bool(eval, receiver)?;
    let value = eval.bool_id(result);
    eval.push_current(value);
    Ok(())
}

fn boolean_to_string(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let result = expect_bool(eval, receiver)?;
    let value = eval.intern_string(if result { "true" } else { "false" });
    eval.push_current(value);
    Ok(())
}

fn number_add(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let result = number_value(eval, receiver) + number_value(eval, args[0]);
    let value = eval.intern_number(&result.to_string());
    eval.push_current(value);
    Ok(())
}

fn number_sub(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let result = number_value(eval, receiver) - number_value(eval, args[0]);
    let value = eval.intern_number(&result.to_string());
    eval.push_current(value);
    Ok(())
}

fn number_mul(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let result = number_value(eval, receiver) * number_value(eval, args[0]);
    let value = eval.intern_number(&result.to_string());
    eval.push_current(value);
    Ok(())
}

fn number_div(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let divisor = number_value(eval, args[0]);
    if divisor == 0.0 {
        return Err(eval.raise_evaluation_error("division by zero"));
    }
    let result = number_value(eval, receiver) / divisor;
    let value = eval.intern_number(&result.to_string());
    eval.push_current(value);
    Ok(())
}

fn number_mod(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let divisor = number_value(eval, args[0]);
    if divisor == 0.0 {
        return Err(eval.raise_evaluation_error("division by zero"));
    }
    let result = number_value(eval, receiver) % divisor;
    let value = eval.intern_number(&result.to_string());
    eval.push_current(value);
    Ok(())
}

fn number_cmp(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId], cmp: fn(f64, f64) -> bool) -> RunResult<()> {
    let result = cmp(number_value(eval, receiver), number_value(eval, args[0]));
    let value = eval.bool_id(result);
    eval.push_current(value);
    Ok(())
}

fn number_lt(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    number_cmp(eval, receiver, args, |a, b| a < b)
}

fn number_gt(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    number_cmp(eval, receiver, args, |a, b| a > b)
}

fn number_le(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    number_cmp(eval, receiver, args, |a, b| a <= b)
}

fn number_ge(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    number_cmp(eval, receiver, args, |a, b| a >= b)
}

fn number_to_string(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let raw = match &eval.instances().get(receiver).inner {
        Some(Inner::Number(raw)) => raw.clone(),
        _ => "0".to_owned(),
    };
    let value = eval.intern_string(&raw);
    eval.push_current(value);
    Ok(())
}

fn string_concat(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let left = expect_string(eval, receiver)?;
    let right = expect_string(eval, args[0])?;
    let value = eval.intern_string(&format!("{left}{right}"));
    eval.push_current(value);
    Ok(())
}

fn string_length(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let text = expect_string(eval, receiver)?;
    let value = eval.intern_number(&text.chars().count().to_string());
    eval.push_current(value);
    Ok(())
}

fn string_to_string(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    eval.push_current(receiver);
    Ok(())
}

fn list_add(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let element = args[0];
    match &mut eval.instances_mut().get_mut(receiver).inner {
        Some(Inner::List(items)) => items.push(element),
        _ => return Err(eval.raise_evaluation_error("add sent to a non-List instance")),
    }
    let value = eval.null_id();
    eval.push_current(value);
    Ok(())
}

fn list_size(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let size = match &eval.instances().get(receiver).inner {
        Some(Inner::List(items)) => items.len(),
        _ => 0,
    };
    let value = eval.intern_number(&size.to_string());
    eval.push_current(value);
    Ok(())
}

fn list_get(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let index = number_value(eval, args[0]) as usize;
    let items = match &eval.instances().get(receiver).inner {
        Some(Inner::List(items)) => items.clone(),
        _ => return Err(eval.raise_evaluation_error("get sent to a non-List instance")),
    };
    let Some(&value) = items.get(index) else {
        return Err(eval.raise_evaluation_error(format!("index {index} out of range for a List of size {}", items.len())));
    };
    eval.push_current(value);
    Ok(())
}

fn list_to_string(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let size = match &eval.instances().get(receiver).inner {
        Some(Inner::List(items)) => items.len(),
        _ => 0,
    };
    let value = eval.intern_string(&format!("a List of size {size}"));
    eval.push_current(value);
    Ok(())
}

fn set_add(eval: &mut Evaluation, receiver: InstanceId, args: &[InstanceId]) -> RunResult<()> {
    let element = args[0];
    let already_present = match &eval.instances().get(receiver).inner {
        Some(Inner::Set(items)) => items.iter().any(|&item| natural_equals(eval, item, element)),
        _ => return Err(eval.raise_evaluation_error("add sent to a non-Set instance")),
    };
    if !already_present {
        if let Some(Inner::Set(items)) = &mut eval.instances_mut().get_mut(receiver).inner {
            items.push(element);
        }
    }
    let value = eval.null_id();
    eval.push_current(value);
    Ok(())
}

fn set_size(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let size = match &eval.instances().get(receiver).inner {
        Some(Inner::Set(items)) => items.len(),
        _ => 0,
    };
    let value = eval.intern_number(&size.to_string());
    eval.push_current(value);
    Ok(())
}

fn set_to_string(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let size = match &eval.instances().get(receiver).inner {
        Some(Inner::Set(items)) => items.len(),
        _ => 0,
    };
    let value = eval.intern_string(&format!("a Set of size {size}"));
    eval.push_current(value);
    Ok(())
}

fn exception_message(eval: &mut Evaluation, receiver: InstanceId) -> InstanceId {
    if let Some(Inner::String(message)) = &eval.instances().get(receiver).inner {
        return eval.intern_string(&message.clone());
    }
    eval.get_field(receiver, "message").unwrap_or_else(|| eval.null_id())
}

fn exception_get_message(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let value = exception_message(eval, receiver);
    eval.push_current(value);
    Ok(())
}

fn exception_to_string(eval: &mut Evaluation, receiver: InstanceId, _args: &[InstanceId]) -> RunResult<()> {
    let message_id = exception_message(eval, receiver);
    let module = eval.instances().get(receiver).module;
    let name = eval.environment().node(module).simple_name().unwrap_or("Exception").to_owned();
    let message = string_value(eval, message_id).map(str::to_owned);
    let rendered = match message {
        Some(message) => format!("{name}: {message}"),
        None => name,
    };
    let value = eval.intern_string(&rendered);
    eval.push_current(value);
    Ok(())
}

/// The [`NativeTable`] matching every `native` method declared in [`base_environment`].
#[must_use]
pub fn native_table() -> NativeTable {
    let mut table = NativeTable::new();
    table.register("wollok.lang.Object", "==", object_eq);
    table.register("wollok.lang.Object", "!=", object_neq);
    table.register("wollok.lang.Object", "toString", object_to_string);

    table.register("wollok.lang.Boolean", "&&", boolean_and);
    table.register("wollok.lang.Boolean", "||", boolean_or);
    table.register("wollok.lang.Boolean", "negate", boolean_negate);
    table.register("wollok.lang.Boolean", "toString", boolean_to_string);

    table.register("wollok.lang.Number", "+", number_add);
    table.register("wollok.lang.Number", "-", number_sub);
    table.register("wollok.lang.Number", "*", number_mul);
    table.register("wollok.lang.Number", "/", number_div);
    table.register("wollok.lang.Number", "%", number_mod);
    table.register("wollok.lang.Number", "<", number_lt);
    table.register("wollok.lang.Number", ">", number_gt);
    table.register("wollok.lang.Number", "<=", number_le);
    table.register("wollok.lang.Number", ">=", number_ge);
    table.register("wollok.lang.Number", "toString", number_to_string);

    table.register("wollok.lang.String", "+", string_concat);
    table.register("wollok.lang.String", "length", string_length);
    table.register("wollok.lang.String", "toString", string_to_string);

    table.register("wollok.lang.List", "add", list_add);
    table.register("wollok.lang.List", "size", list_size);
    table.register("wollok.lang.List", "get", list_get);
    table.register("wollok.lang.List", "toString", list_to_string);

    table.register("wollok.lang.Set", "add", set_add);
    table.register("wollok.lang.Set", "size", set_size);
    table.register("wollok.lang.Set", "toString", set_to_string);

    table.register("wollok.lang.Exception", "getMessage", exception_get_message);
    table.register("wollok.lang.Exception", "toString", exception_to_string);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{linker::resolve_fqn, Config};

    #[test]
    fn every_well_known_fqn_resolves() {
        let env = base_environment();
        for fqn in [
            "wollok.lang.Object",
            "wollok.lang.Boolean",
            "wollok.lang.Number",
            "wollok.lang.String",
            "wollok.lang.List",
            "wollok.lang.Set",
            "wollok.lang.Closure",
            "wollok.lang.Exception",
            "wollok.lang.EvaluationError",
            "wollok.lang.StackOverflowException",
        ] {
            assert!(resolve_fqn(&env, fqn).is_some(), "{fqn} did not resolve");
        }
    }

    #[test]
    fn evaluation_boots_ready() {
        let eval = Evaluation::of(base_environment(), native_table(), Config::default());
        assert!(eval.is_ok(), "{:?}", eval.err());
    }

    #[test]
    fn number_arithmetic_round_trips_through_send_message() {
        let mut eval = Evaluation::of(base_environment(), native_table(), Config::default()).expect("boots");
        let three = eval.intern_number("3");
        let four = eval.intern_number("4");
        let mut tracer = crate::tracer::NoopTracer;
        let result = eval.send_message("+", three, &[four], &mut tracer).expect("send");
        assert_eq!(number_value(&eval, result), 7.0);
    }
}
