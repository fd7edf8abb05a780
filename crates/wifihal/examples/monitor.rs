//! Monitor nl80211 driver events.
//!
//! Run with: sudo cargo run -p wifihal --example monitor
//!
//! Requires a wifi driver exposing the nl80211 family. Trigger a scan
//! (e.g. `iw dev wlan0 scan`) to see events arrive.

use wifihal::WifiHal;
use wifihal::genl::nl80211;

#[tokio::main]
async fn main() -> wifihal::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let hal = WifiHal::new().await?;
    println!("nl80211 family id: {}", hal.family_id());

    hal.register_handler(nl80211::CMD_TRIGGER_SCAN, |msg| {
        println!("scan started on ifindex {:?}", msg.ifindex());
    });
    hal.register_handler(nl80211::CMD_NEW_SCAN_RESULTS, |msg| {
        println!("scan results on ifindex {:?}", msg.ifindex());
    });
    hal.register_handler(nl80211::CMD_RADAR_DETECT, |msg| {
        println!("radar event on ifindex {:?}", msg.ifindex());
    });

    hal.start();
    println!("Monitoring driver events. Press Ctrl+C to exit.");

    tokio::signal::ctrl_c().await?;
    hal.cleanup().await;
    Ok(())
}
