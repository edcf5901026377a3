//! Modules compiled into the demo host.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use runworker::export::Args;
use runworker::{Bridge, Export, ModuleTable, PlainError};
use serde_json::{json, Value};

pub fn table() -> ModuleTable {
    ModuleTable::new()
        .register("demo", demo)
        .register("broken", |_| {
            Err(PlainError::new("broken module refuses to load").with_field("code", "E_BROKEN"))
        })
        .register("chatty", chatty)
}

struct Owner {
    y: String,
}

struct Counter {
    value: AtomicI64,
}

fn sleep_ms(args: &Args, index: usize) -> Result<Duration, PlainError> {
    let ms: Option<u64> = args.get(index)?;
    Ok(Duration::from_millis(ms.unwrap_or(0)))
}

fn demo(bridge: &Bridge) -> Result<Export, PlainError> {
    let owner = Arc::new(Owner { y: "abc".into() });
    let counter = Arc::new(Counter {
        value: AtomicI64::new(0),
    });
    let events = bridge.clone();

    let module = Export::record()
        .with(
            "add",
            Export::sync(|args: Args| {
                let (a, b): (i64, i64) = (args.get(0)?, args.get(1)?);
                Ok(json!(a + b))
            }),
        )
        .with(
            "delayed",
            Export::deferred(|args: Args| async move {
                let x: i64 = args.get(0)?;
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!(x * 2))
            }),
        )
        .with(
            "action1",
            Export::deferred(move |_args: Args| {
                let events = events.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    events
                        .emit("helloworld", json!("hi"))
                        .map_err(|e| PlainError::marshal(&e))?;
                    Ok(json!(1))
                }
            }),
        )
        .with("action2", Export::sync(|_| Ok(json!(2))))
        .with("action3", Export::pending(async { Ok(json!(true)) }))
        .with(
            "ready",
            Export::pending(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(json!("ready"))
            }),
        )
        .with(
            "namespace",
            Export::record().with("sub1", Export::sync(|_| Ok(json!(3)))),
        )
        .with(
            "list",
            Export::list()
                .push(Export::sync(|_| Ok(json!(4))))
                .push(Export::sync(|_| Ok(json!(5)))),
        )
        .with(
            "mixed",
            Export::list()
                .push(Export::sync(|_| Ok(json!("first"))))
                .push(Export::value(42))
                .push(Export::sync(|_| Ok(json!("third")))),
        )
        .with("x", Export::value(1))
        .with("y", Export::value(owner.y.clone()))
        .with("z", Export::value(true))
        .with("v1", Export::null())
        .with(
            "getY",
            Export::method(owner, |owner: &Owner, _| Ok(json!(owner.y))),
        )
        .with(
            "test",
            Export::sync(|args: Args| {
                let s: String = args.get(0)?;
                Ok(json!(format!("{s}!")))
            }),
        )
        .with(
            "counter",
            Export::record()
                .with(
                    "increment",
                    Export::method(counter.clone(), |c: &Counter, args| {
                        let by: Option<i64> = args.get(0)?;
                        Ok(json!(c.value.fetch_add(by.unwrap_or(1), Ordering::SeqCst) + by.unwrap_or(1)))
                    }),
                )
                .with(
                    "get",
                    Export::async_method(counter, |c: Arc<Counter>, _| async move {
                        Ok(json!(c.value.load(Ordering::SeqCst)))
                    }),
                ),
        )
        .with("echo", Export::sync(|args: Args| Ok(args.raw(0).cloned())))
        .with("nothing", Export::sync(|_| Ok(())))
        .with("null", Export::sync(|_| Ok(Value::Null)))
        .with(
            "slow",
            Export::deferred(|args: Args| async move {
                let pause = sleep_ms(&args, 0)?;
                tokio::time::sleep(pause).await;
                Ok(args.raw(1).cloned())
            }),
        )
        .with(
            "forever",
            Export::deferred(|_| futures::future::pending::<Result<Value, PlainError>>()),
        )
        .with(
            "error",
            Export::sync(|_| -> Result<Value, PlainError> {
                Err(PlainError::new("test error").with_field("code", "E_TEST"))
            }),
        )
        .with(
            "nativeError",
            Export::sync(|_| {
                let parsed: i64 = "not a number".parse().map_err(|e| PlainError::marshal(&e))?;
                Ok(json!(parsed))
            }),
        )
        .with(
            "panic",
            Export::sync(|_| -> Result<Value, PlainError> { panic!("worker panicked on purpose") }),
        )
        .with(
            "exit",
            Export::sync(|args: Args| -> Result<Value, PlainError> {
                let code: Option<i32> = args.get(0)?;
                std::process::exit(code.unwrap_or(0))
            }),
        );

    Ok(module.build())
}

fn chatty(bridge: &Bridge) -> Result<Export, PlainError> {
    let replies = bridge.clone();
    bridge.on("poke", move |payload| {
        if let Err(e) = replies.emit("poked", payload.clone()) {
            tracing::warn!(error = %e, "cannot answer poke");
        }
    });

    let pings = bridge.clone();
    let shouts = bridge.clone();
    let module = Export::record()
        .with(
            "ping",
            Export::sync(move |args: Args| {
                pings
                    .emit("pong", args.raw(0).cloned().unwrap_or(Value::Null))
                    .map_err(|e| PlainError::marshal(&e))?;
                Ok(())
            }),
        )
        .with(
            "shout",
            Export::sync(move |args: Args| {
                let event: String = args.get(0)?;
                shouts
                    .emit(&event, Value::Null)
                    .map_err(|e| PlainError::marshal(&e).with_field("code", "RESERVED_EVENT"))?;
                Ok(())
            }),
        );

    Ok(module.build())
}
