//! Basic weft example
//!
//! Spawns a few tickers, delegates a computation, joins one task and kills
//! another that would otherwise sleep forever.
//!
//! # Environment Variables
//!
//! - `WEFT_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `WEFT_LOG_TIME=1` - Prefix log lines with seconds since start
//! - `WEFT_FLUSH_EPRINT=1` - Flush debug output immediately

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use weft::{call, end, join, kdebug, kill, sleep, spawn, yield_now, Runtime, SchedulerConfig, Task};
use weft::{kinfo, TaskResult};

// WEFT_LOG_LEVEL=debug cargo run -p weft-basic
fn main() {
    println!("=== weft Basic Example ===\n");

    weft::init_logging();
    let config = SchedulerConfig::from_env().debug_logging(true);
    let mut runtime = Runtime::new(config);

    let ticks = Rc::new(Cell::new(0usize));
    let counted = Rc::clone(&ticks);
    let start = Instant::now();

    let result = runtime.run(async move {
        for i in 1..=3 {
            let ticks = Rc::clone(&counted);
            let id = spawn(Task::new(async move {
                for j in 0..3 {
                    kdebug!("[ticker {}] iteration {}", i, j);
                    ticks.set(ticks.get() + 1);
                    yield_now().await?;
                }
                Ok(())
            }))
            .await?;
            println!("Spawned ticker {} ({})", i, id);
        }

        let answer: u64 = call(Task::new(square_sum(6)).with_name("square_sum")).await?;
        println!("square_sum(6) = {}", answer);

        let napper = spawn(Task::new(async {
            sleep(Duration::from_millis(50)).await?;
            kinfo!("napper woke up");
            Ok(())
        }))
        .await?;
        join(napper).await?;
        println!("Joined napper after {:?}", start.elapsed());

        let sleeper = spawn(Task::new(sleep(Duration::from_secs(3600)))).await?;
        kill(sleeper).await?;
        println!("Killed sleeper {}", sleeper);
        Ok(())
    });

    match result {
        Ok(()) => {
            println!("\n{} tick(s) counted", ticks.get());
            if let Some(stats) = runtime.stats() {
                println!("{}", stats);
            }
            println!("\n=== Example Complete ===");
        }
        Err(e) => {
            eprintln!("run failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// 1² + 2² + ... + n², one delegated task per term
async fn square_sum(n: u64) -> TaskResult<weft::Value> {
    let mut total = 0u64;
    for k in 1..=n {
        let sq: u64 = call(Task::new(async move { Ok(k * k) })).await?;
        total += sq;
    }
    end(total).await
}
