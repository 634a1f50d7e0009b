use std::time::Duration;

use flagwatch::{
    workout::{record_workout_selection, WorkoutKind},
    ClientConfig, ConsentGate, LogLevel,
};

pub fn main() {
    let api_key = std::env::var("FLAGWATCH_API_KEY").unwrap();

    let mut config = ClientConfig::from_api_key(api_key);
    config
        .log_level(LogLevel::Verbose)
        // Give up waiting for treatments after one second.
        .ready_timeout(Duration::from_millis(1000));

    env_logger::Builder::new()
        .filter_level(config.get_log_level().to_level_filter())
        .init();

    let (client, event_loop) = config.connect().unwrap();
    let client = std::sync::Arc::new(client);
    let (consent, _) = ConsentGate::new(client.clone());

    // The consumer-facing context: a single-threaded runtime owning all observable state.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let mut readiness = event_loop.watch();
    runtime.spawn(event_loop.run());

    let state = runtime.block_on(readiness.wait_usable());
    println!("Ready: {}, timed out: {}", state.ready, state.timed_out);

    consent.set(true);

    for kind in WorkoutKind::ALL {
        let tracked = record_workout_selection(&client, kind);
        println!("{kind}: tracked = {tracked}");
    }

    client.shutdown();
}
