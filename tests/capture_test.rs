//! Capture engine tests: argument priority, validation, prefixes and nested
//! captured calls.

use capstan::{inject, ArgSource, Args, ConfigTree, Error, Experiment, RunOptions, Signature};
use serde_json::{json, Map, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn f_signature() -> Signature {
    Signature::new("f").param("a").param("foo").param_default("bar", 10)
}

fn scope_config() -> Map<String, Value> {
    let mut tree = ConfigTree::new();
    tree.set("foo", 42);
    tree.set("bar", "baz");
    tree.as_map().clone()
}

#[test]
fn test_config_overrides_local_default() {
    let args = inject(&f_signature(), &Args::new().arg(1), &scope_config()).unwrap();

    assert_eq!(args.values(), vec![&json!(1), &json!(42), &json!("baz")]);
    assert_eq!(args.source("a"), Some(ArgSource::Explicit));
    assert_eq!(args.source("foo"), Some(ArgSource::Config));
    assert_eq!(args.source("bar"), Some(ArgSource::Config));
}

#[test]
fn test_explicit_wins_over_config() {
    let args =
        inject(&f_signature(), &Args::new().arg(1).kwarg("bar", 12), &scope_config()).unwrap();

    assert_eq!(args.values(), vec![&json!(1), &json!(42), &json!(12)]);
    assert_eq!(args.source("bar"), Some(ArgSource::Explicit));
}

#[test]
fn test_missing_parameter_names_parameter_and_callable() {
    let err = inject(&f_signature(), &Args::new(), &scope_config()).unwrap_err();

    match err {
        Error::MissingParameter { parameter, callable } => {
            assert_eq!(parameter, "a");
            assert_eq!(callable, "f");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_default_used_without_config() {
    let args = inject(&f_signature(), &Args::new().arg(1).arg(2), &Map::new()).unwrap();
    assert_eq!(args.get::<i64>("bar").unwrap(), 10);
    assert_eq!(args.source("bar"), Some(ArgSource::Default));
}

#[test]
fn test_argument_validation() {
    let config = scope_config();

    assert!(matches!(
        inject(&f_signature(), &Args::new().arg(1).arg(2).arg(3).arg(4), &config),
        Err(Error::TooManyPositional { expected: 3, given: 4, .. })
    ));
    assert!(matches!(
        inject(&f_signature(), &Args::new().kwarg("nope", 1), &config),
        Err(Error::UnexpectedArgument { parameter, .. }) if parameter == "nope"
    ));
    assert!(matches!(
        inject(&f_signature(), &Args::new().arg(1).kwarg("a", 2), &config),
        Err(Error::DuplicateArgument { parameter, .. }) if parameter == "a"
    ));
}

#[test]
fn test_typed_access_errors() {
    let args = inject(&f_signature(), &Args::new().arg("not a number"), &scope_config()).unwrap();

    assert!(matches!(args.get::<i64>("a"), Err(Error::ArgumentType { .. })));
    assert!(matches!(args.get::<i64>("unknown"), Err(Error::ArgumentType { .. })));
    assert_eq!(args.get::<String>("a").unwrap(), "not a number");
}

#[test]
fn test_scenarios_inside_a_run() {
    let seen: Rc<RefCell<Vec<Vec<Value>>>> = Rc::default();

    let mut ex = Experiment::new("scenarios");
    ex.config_scope("defaults", |cfg| {
        cfg.set("foo", 42).set("bar", "baz");
        Ok(())
    });
    let record = seen.clone();
    let f = ex.capture(f_signature(), move |_, args| {
        record.borrow_mut().push(args.values().into_iter().cloned().collect());
        Ok(())
    });
    ex.main(Signature::new("main"), move |ctx, _| {
        ctx.call_with(&f, &Args::new().arg(1))?;
        ctx.call_with(&f, &Args::new().arg(1).kwarg("bar", 12))?;
        // Explicit values apply to that call only.
        ctx.call_with(&f, &Args::new().arg(2))?;
        Ok(())
    });

    ex.run(RunOptions::new()).unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![
            vec![json!(1), json!(42), json!("baz")],
            vec![json!(1), json!(42), json!(12)],
            vec![json!(2), json!(42), json!("baz")],
        ]
    );
}

#[test]
fn test_prefixed_function_reads_subtree() {
    let mut ex = Experiment::new("prefixed");
    ex.add_config_dict(json!({
        "lr": 1.0,
        "optimizer": {"lr": 0.01, "momentum": 0.9}
    }))
    .unwrap();
    let signature = Signature::new("make_optimizer").param("lr").param_default("momentum", 0.0);
    let make = ex.capture(signature, |_, args| {
        Ok((args.get::<f64>("lr")?, args.get::<f64>("momentum")?))
    });
    let root = make.clone();
    let scoped = make.with_prefix("optimizer");
    assert_eq!(root.prefix(), "");
    assert_eq!(scoped.prefix(), "optimizer");

    ex.main(Signature::new("main"), move |ctx, _| Ok((ctx.call(&root)?, ctx.call(&scoped)?)));

    let run = ex.run(RunOptions::new()).unwrap();
    assert_eq!(run.result(), Some(&json!([[1.0, 0.0], [0.01, 0.9]])));
}

#[test]
fn test_config_is_frozen_per_run() {
    let mut ex = Experiment::new("frozen");
    ex.add_config_dict(json!({"n": 1})).unwrap();
    let read = ex.capture(Signature::new("read").param("n"), |ctx, args| {
        assert_eq!(ctx.config().get("n"), args.value("n"));
        Ok(args.get::<i64>("n")?)
    });
    ex.main(Signature::new("main"), move |ctx, _| ctx.call(&read));

    let first = ex.run(RunOptions::new().update("n", 5)).unwrap();
    let second = ex.run(RunOptions::new()).unwrap();

    assert_eq!(first.result(), Some(&json!(5)));
    assert_eq!(second.result(), Some(&json!(1)));
    assert_eq!(first.config().get("n"), Some(&json!(5)));
}
