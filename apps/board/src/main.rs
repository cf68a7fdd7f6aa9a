use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use client_core::{
    BoardEvent, FilterSelection, HttpMarkerApi, MarkerBoard, MemorySessionStore,
    NominatimGeocoder, DEFAULT_GEOCODER_URL,
};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: String,
    #[arg(long, default_value = DEFAULT_GEOCODER_URL)]
    geocoder_url: String,
    /// Show only markers from this country.
    #[arg(long)]
    country: Option<String>,
    /// Place one marker: all four of --lat --lng --name --message.
    #[arg(long)]
    lat: Option<f64>,
    #[arg(long)]
    lng: Option<f64>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    message: Option<String>,
    /// Keep running and print markers as other visitors place them.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let placement = match (args.lat, args.lng, &args.name, &args.message) {
        (Some(lat), Some(lng), Some(name), Some(message)) => {
            Some((lat, lng, name.clone(), message.clone()))
        }
        (None, None, None, None) => None,
        _ => bail!("placing a marker needs all of --lat, --lng, --name and --message"),
    };

    let api = Arc::new(HttpMarkerApi::new(args.server_url));
    let geocoder = Arc::new(NominatimGeocoder::new(&args.geocoder_url)?);
    let session = Arc::new(MemorySessionStore::new());
    let board = MarkerBoard::new(api, geocoder, session);

    let mut events = board.subscribe_events();
    board.start().await;

    if let Some(country) = args.country {
        board
            .select_country(FilterSelection::Country(country))
            .await;
    }

    let markers = board.visible_markers().await;
    println!("{} marker(s) on the board", markers.len());
    for marker in &markers {
        println!(
            "  ({:.2}, {:.2}) {} in {}: {}",
            marker.lat, marker.lng, marker.name, marker.country, marker.message
        );
    }

    if let Some((lat, lng, name, message)) = placement {
        let form = board.begin_placement(lat, lng).await?;
        println!("placing a marker in {}", form.country);
        board.set_name(&name).await?;
        board.set_message(&message).await?;
        board.submit().await?;
        println!("marker submitted; it will appear once the feed echoes it");
    }

    if args.watch {
        println!("watching for new markers (ctrl-c to stop)");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(BoardEvent::MarkerAdded(marker)) => println!(
                        "  ({:.2}, {:.2}) {} in {}: {}",
                        marker.lat, marker.lng, marker.name, marker.country, marker.message
                    ),
                    Ok(BoardEvent::Error(message)) => eprintln!("board error: {message}"),
                    Ok(_) => {}
                    Err(_) => break,
                },
            }
        }
    }

    board.shutdown().await;
    Ok(())
}
