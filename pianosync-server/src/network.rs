//! Server and console-monitor run loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pianosync_net::{ClientEvent, LinkState, NetServer, PianoClient};
use pianosync_types::{EqualTemperament, NoteLookup};

use crate::config::Config;

/// Install a Ctrl+C handler that raises the returned flag.
fn shutdown_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    }) {
        log::warn!("Could not install Ctrl+C handler: {}", e);
    }
    flag
}

// =============================================================================
// Server Mode
// =============================================================================

pub fn run_server(config: &Config, bind_override: Option<&str>) -> std::io::Result<()> {
    let bind = bind_override
        .map(str::to_string)
        .unwrap_or_else(|| config.bind_addr());
    let net_config = config.net_config();
    log::info!("Starting pianosync server on {}", bind);
    log::debug!("Network config: {:?}", net_config);

    let mut server = NetServer::bind(&bind, net_config)?;
    println!("pianosync listening on {}", server.local_addr()?);

    let shutdown = shutdown_flag();
    server.run(&shutdown);

    log::info!(
        "Server stopped at state version {}",
        server.dispatcher().store().version()
    );
    Ok(())
}

// =============================================================================
// Console Monitor Mode
// =============================================================================

/// Connect as a client and print every state change with note names.
pub fn run_monitor(config: &Config, addr: &str) -> std::io::Result<()> {
    let client_id = format!("monitor-{}", std::process::id());
    let mut client = PianoClient::connect(addr, &client_id, config.net_config().reliability)?;
    let lookup = EqualTemperament::default();
    let shutdown = shutdown_flag();

    println!("Monitoring {} as {}", addr, client_id);

    while !shutdown.load(Ordering::Relaxed) {
        let events = client.poll(Instant::now());
        for event in &events {
            print_event(event, &client, &lookup);
        }
        if client.link_state() == LinkState::Disconnected {
            break;
        }
        if events.is_empty() {
            thread::sleep(Duration::from_millis(10));
        }
    }

    client.disconnect();
    Ok(())
}

fn print_event(event: &ClientEvent, client: &PianoClient, lookup: &impl NoteLookup) {
    match event {
        ClientEvent::LinkStateChanged(state) => println!("link: {:?}", state),
        ClientEvent::StateUpdated { state_version } => {
            let notes: Vec<String> = client
                .active_notes()
                .iter()
                .map(|(&midi, &velocity)| {
                    format!(
                        "{} ({:.1} Hz, vel {})",
                        lookup.midi_number_to_note_name(midi),
                        lookup.midi_number_to_frequency(midi),
                        velocity
                    )
                })
                .collect();
            println!(
                "v{} [{} client(s)] {}",
                state_version,
                client.active_client_count(),
                if notes.is_empty() {
                    "silence".to_string()
                } else {
                    notes.join(", ")
                }
            );
        }
        ClientEvent::Relayed(msg) => println!("relay: {}", msg.type_tag()),
        ClientEvent::Error(e) => println!("error: {} {}", e.code, e.message),
        ClientEvent::Metrics(m) => println!(
            "server dropped {} message(s), queue depth {}",
            m.dropped_messages, m.queue_depth
        ),
    }
}
