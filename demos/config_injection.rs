//! Config Injection Example
//!
//! Demonstrates layered configuration, parameter injection into captured
//! functions, and the observable run lifecycle.
//!
//! Run with: cargo run --example config_injection

use capstan::config::ConfigDict;
use capstan::observer::MemoryObserver;
use capstan::{Args, Error, Experiment, RunOptions, Signature, UserError};
use serde_json::json;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    println!("=== Capstan Config Injection ===\n");

    let observer = Arc::new(MemoryObserver::new());
    let mut ex = Experiment::new("resnet-training");
    ex.observe(observer.clone());

    // -------------------------------------------------------------------------
    // 1. Declare configuration sources
    // -------------------------------------------------------------------------
    println!("1. Declaring config sources...");

    ex.config_scope("defaults", |cfg| {
        cfg.set("model", "resnet50")
            .set("epochs", 5)
            .set("batch_size", 32)
            .set("optimizer.lr", 0.001)
            .set("optimizer.momentum", 0.9);
        let batch: u32 = cfg.get_as("batch_size")?;
        cfg.set("steps_per_epoch", 50_000 / batch);
        Ok(())
    });
    ex.named_config(
        "quick",
        ConfigDict::from_value("quick", json!({"epochs": 2, "batch_size": 256}))?,
    );

    let resolved = ex.resolve_config(&RunOptions::new().with_named_config("quick"))?;
    println!("   Resolved with `quick`:\n{}", resolved.tree.to_json_pretty()?);

    // -------------------------------------------------------------------------
    // 2. Capture functions
    // -------------------------------------------------------------------------
    println!("\n2. Capturing functions...");

    let make_optimizer = ex
        .capture(
            Signature::new("make_optimizer").param("lr").param_default("momentum", 0.0),
            |_, args| {
                let lr: f64 = args.get("lr")?;
                let momentum: f64 = args.get("momentum")?;
                Ok(format!("SGD(lr={lr}, momentum={momentum})"))
            },
        )
        .with_prefix("optimizer");

    let train_epoch = ex.capture(
        Signature::new("train_epoch").param("epoch").param("steps_per_epoch"),
        |ctx, args| {
            let epoch: u32 = args.get("epoch")?;
            let steps: u32 = args.get("steps_per_epoch")?;
            let loss = 2.5 / (f64::from(epoch) + 1.0) + 0.1;
            ctx.log_scalar("loss", loss, Some(u64::from(epoch)));
            ctx.log_scalar("steps", f64::from(steps), None);
            Ok(loss)
        },
    );

    ex.main(
        Signature::new("train").param("model").param("epochs"),
        move |ctx, args| {
            let model: String = args.get("model")?;
            let epochs: u32 = args.get("epochs")?;
            let optimizer = ctx.call(&make_optimizer)?;
            ctx.add_info("optimizer", &optimizer)?;

            let mut loss = f64::NAN;
            for epoch in 0..epochs {
                loss = ctx.call_with(&train_epoch, &Args::new().kwarg("epoch", epoch))?;
                ctx.heartbeat();
            }
            if loss.is_nan() {
                return Err(UserError::new("ValueError", "no epochs were run").into());
            }
            Ok(json!({"model": model, "final_loss": loss}))
        },
    );
    println!("   Captured: {:?}", ex.record().captured());

    // -------------------------------------------------------------------------
    // 3. Run with the quick named config and a command-line style update
    // -------------------------------------------------------------------------
    println!("\n3. Running...");

    let run = ex.run(
        RunOptions::new()
            .with_named_config("quick")
            .parse_update("optimizer.lr=0.01")?
            .run_id("demo-run"),
    )?;
    println!("   Run ID: {}", run.id());
    println!("   Status: {:?}", run.status());
    println!("   Result: {}", run.result().map_or_else(String::new, ToString::to_string));
    println!("   Info: {}", serde_json::Value::Object(run.info().clone()));

    // -------------------------------------------------------------------------
    // 4. Inspect what the observer saw
    // -------------------------------------------------------------------------
    println!("\n4. Observer events: {:?}", observer.event_names());
    for metric in observer.get_metrics_for_run("demo-run", "loss") {
        println!("   Step {}: loss={:.4}", metric.step(), metric.value());
    }

    // -------------------------------------------------------------------------
    // 5. A failing run keeps only user frames in its trace
    // -------------------------------------------------------------------------
    println!("\n5. Failing run...");

    match ex.run(RunOptions::new().update("epochs", 0)) {
        Err(Error::UserCode { failure, .. }) => {
            println!("   Kind: {}", failure.kind());
            println!("   {}", failure.format_trace().replace('\n', "\n   "));
        }
        other => println!("   Unexpected outcome: {:?}", other.map(|run| run.status())),
    }

    println!("\n=== Config Injection Complete ===");
    Ok(())
}
