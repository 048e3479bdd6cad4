//! Small demo application: a heartbeat reactor ticking on `Every`, and a
//! greeter reactor that reacts to the heartbeat and prints a count.
//!
//! `main`'s shape: parse a `clap::Parser` args struct, init logging, build
//! the runtime, run it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nuclear::dsl::words::{Every, PriorityWord, Trigger};
use nuclear::emit::Scope;
use nuclear::error::BindError;
use nuclear::reactor::ReactorContext;
use nuclear::{CliArgs, LogLevel, PowerPlant, Reactor};

struct Tick(u64);

struct Heartbeat;

impl Reactor for Heartbeat {
    fn install(ctx: &ReactorContext) -> Result<Self, BindError> {
        let emit_ctx = ctx.emit_ctx().clone();
        let counter = Arc::new(AtomicU64::new(0));
        ctx.on(
            vec![Every::new(Duration::from_millis(200))],
            "tick",
            move |_args| {
                let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                nuclear::emit::emit(&emit_ctx, Tick(n), Scope::Local);
            },
        )?;
        Ok(Self)
    }
}

struct Greeter;

impl Reactor for Greeter {
    fn install(ctx: &ReactorContext) -> Result<Self, BindError> {
        ctx.on(
            vec![Trigger::<Tick>::new(), PriorityWord::high()],
            "on_tick",
            |args| {
                let tick = args.into_iter().next().unwrap().downcast::<Arc<Tick>>().unwrap();
                println!("tick {}", tick.0);
            },
        )?;
        Ok(Self)
    }
}

fn main() {
    let args: CliArgs = clap::Parser::parse();
    let config = match args.into_config() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to load configuration: {}", error);
            std::process::exit(1);
        }
    };

    nuclear::log::init(&config.log_level);

    let powerplant = PowerPlant::new(config).expect("only one PowerPlant per process");
    powerplant.install::<Heartbeat>().expect("bind Heartbeat");
    powerplant.install::<Greeter>().expect("bind Greeter");

    powerplant.log(LogLevel::Info, "starting nuclear-demo");

    let shutdown_handle = powerplant.clone();
    ctrlc_shutdown(move || shutdown_handle.shutdown());

    powerplant.start();
}

/// Install a `Ctrl-C` handler that calls `on_shutdown` once: libc's
/// `signal(2)` plus a process-wide callback slot, since this demo has no
/// async runtime to hang a signal future off of.
fn ctrlc_shutdown(on_shutdown: impl Fn() + Send + Sync + 'static) {
    use std::sync::OnceLock;

    static HANDLER: OnceLock<Box<dyn Fn() + Send + Sync>> = OnceLock::new();
    let _ = HANDLER.set(Box::new(move || on_shutdown()));

    extern "C" fn dispatch(_sig: libc::c_int) {
        if let Some(handler) = HANDLER.get() {
            handler();
        }
    }

    unsafe {
        libc::signal(libc::SIGINT, dispatch as libc::sighandler_t);
    }
}
