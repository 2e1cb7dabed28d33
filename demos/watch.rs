//! Watch every robot on an account and print its status changes.
//!
//! Usage: cargo run --example watch -- [config.toml]
//!
//! The config file needs at least an `[account]` table with `username`,
//! `password` and `region`. Set `RUST_LOG=weback_vacuum=debug` for protocol
//! traces.

use weback_vacuum::{SessionConfig, SessionUpdate, WebackClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("weback_vacuum=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "weback.toml".to_string());
    let config = SessionConfig::from_file(&path)?;
    let client = WebackClient::new(config).await?;

    let devices = client.devices().await?;
    if devices.is_empty() {
        println!("No robots on this account");
        return Ok(());
    }

    let mut tasks = Vec::new();
    for device in devices {
        println!("Watching {} ({})", device.nickname(), device.thing_name());
        tasks.push(tokio::spawn(async move {
            let refresh = device.start_refresh();
            let mut updates = device.subscribe();

            if let Err(e) = device.load_map().await {
                println!("[{}] no map: {}", device.nickname(), e);
            }

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    update = updates.recv() => match update {
                        Ok(SessionUpdate::Status(status)) => println!(
                            "[{}] {} battery={:?}% error={:?}",
                            device.nickname(),
                            status
                                .working_state()
                                .map(|state| state.as_str().to_string())
                                .unwrap_or_else(|| "unknown".into()),
                            status.battery_level(),
                            status.error(),
                        ),
                        Ok(SessionUpdate::Map) => {
                            if let Some(map) = device.map() {
                                println!(
                                    "[{}] map {}x{}, {} rooms, robot at {:?}",
                                    device.nickname(),
                                    map.width(),
                                    map.height(),
                                    map.rooms().len(),
                                    map.robot_position_virtual(),
                                );
                            }
                        }
                        Err(e) => {
                            println!("[{}] updates ended: {}", device.nickname(), e);
                            break;
                        }
                    },
                }
            }

            refresh.shutdown().await;
        }));
    }

    for task in tasks {
        task.await?;
    }
    Ok(())
}
