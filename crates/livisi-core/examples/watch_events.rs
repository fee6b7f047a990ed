// Connect to a hub, print the device catalog, then stream events.
//
// Usage: watch_events <host> <password>

use secrecy::SecretString;

use livisi_core::{HubConfig, HubCoordinator, Topic};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().ok_or("usage: watch_events <host> <password>")?;
    let password = args.next().ok_or("usage: watch_events <host> <password>")?;

    let config = HubConfig::new(host, SecretString::from(password));
    let coordinator = HubCoordinator::connect(config).await?;

    let devices = coordinator.get_devices().await?;
    for device in devices.iter() {
        println!(
            "{:20} {:6} room={:12} battery_low={} unreachable={}",
            device.name().unwrap_or("<unnamed>"),
            device.device_type,
            device.room.as_deref().unwrap_or("-"),
            device.battery_low,
            device.unreachable,
        );
    }

    // Watch every state property of the first capability we can find,
    // plus the global button/motion bus.
    let mut bus = coordinator.events();
    let mut state = devices
        .iter()
        .flat_map(|d| d.capabilities.values())
        .next()
        .map(|capability_id| {
            coordinator.subscribe(Topic::State {
                capability_id: capability_id.clone(),
                property: "onState".into(),
            })
        });

    loop {
        tokio::select! {
            event = bus.recv() => println!("event: {event:?}"),
            event = async {
                match state.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => println!("state: {event:?}"),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    coordinator.shutdown().await;
    Ok(())
}
