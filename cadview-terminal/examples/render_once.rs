/// Example: Render one frame of a CAD file without a terminal UI
///
/// Usage: cargo run --example render_once -- path/to/part.stl [WIDTH HEIGHT]

use std::env;
use std::fs;
use std::io;
use std::path::Path;

use cadview_core::{stl, Mesh};
use cadview_session::{ChannelTransport, SessionController, ViewerConfig};

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let mut config = ViewerConfig::default();
    if let (Some(w), Some(h)) = (args.get(2), args.get(3)) {
        config.render.width = w.parse().unwrap_or(config.render.width);
        config.render.height = h.parse().unwrap_or(config.render.height);
    }

    let (name, bytes) = match args.get(1) {
        Some(path) => {
            let name = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            (name, fs::read(path)?)
        }
        None => {
            eprintln!("Usage: {} <stl-or-step-file> [WIDTH HEIGHT]", args[0]);
            eprintln!("\nNo file provided, using default cube...");
            ("cube.stl".to_string(), stl::to_binary(&Mesh::cube(2.0), "cube"))
        }
    };

    let (transport, frames) = ChannelTransport::new();
    let session = SessionController::builder(config).build(Box::new(transport));
    session
        .upload(&name, bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", name, e)))?;

    for file in session.loaded_files() {
        println!(
            "{} {} ({}, {} triangles)",
            file.id,
            file.label,
            file.format.map_or("?", |f| f.label()),
            file.triangles
        );
    }
    if let Ok(frame) = frames.try_recv() {
        println!("{}", frame.image.to_text());
    }
    Ok(())
}
