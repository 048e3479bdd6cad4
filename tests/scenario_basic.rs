//! A single reaction bound to a single trigger type, driven through the
//! full `PowerPlant` lifecycle: construct, install, start on a background
//! thread, emit, shutdown, observe.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use nuclear::dsl::words::Trigger;
use nuclear::emit::Scope;
use nuclear::error::BindError;
use nuclear::reactor::ReactorContext;
use nuclear::{PowerPlant, PowerPlantConfig, Reactor};

struct Greeting(String);

struct Greeter {
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl Reactor for Greeter {
    fn install(ctx: &ReactorContext) -> Result<Self, BindError> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        ctx.on(vec![Trigger::<Greeting>::new()], "on_greeting", move |args| {
            let greeting = args.into_iter().next().unwrap().downcast::<Arc<Greeting>>().unwrap();
            seen_clone.lock().push(greeting.0.clone());
        })?;
        Ok(Self { seen })
    }
}

#[test]
fn emitted_value_reaches_the_bound_reaction() {
    let powerplant = PowerPlant::new(PowerPlantConfig::default()).unwrap();
    let reactor = powerplant.install::<Greeter>().unwrap();

    let driver = powerplant.clone();
    let handle = std::thread::spawn(move || driver.start());

    std::thread::sleep(Duration::from_millis(20));
    powerplant.emit(Greeting("hello".to_string()), Scope::Local);
    std::thread::sleep(Duration::from_millis(20));
    powerplant.shutdown();
    handle.join().unwrap();

    assert_eq!(*reactor.seen.lock(), vec!["hello".to_string()]);
}
