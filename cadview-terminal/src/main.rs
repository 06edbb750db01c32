/// CADview Terminal Viewer
///
/// Usage: cadview-terminal [--config viewer.toml] [FILE.stl|FILE.step ...]
///
/// Without files a sample cube is loaded.
/// Controls:
///   - WASD / Arrow Keys: Orbit
///   - IJKL: Pan, +/-: Zoom, F: Fit view
///   - Mouse: left click picks a triangle, right click clears
///   - Tab: Outline next node, T: Wireframe, V: Hide, X: Remove
///   - Q/ESC: Quit
use std::env;
use std::io;
use std::path::PathBuf;

use cadview_core::{stl, Mesh};
use cadview_session::ViewerConfig;
use cadview_terminal::TerminalApp;

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut config_path = None;
    let mut files = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = args.next().map(PathBuf::from);
        } else {
            files.push(PathBuf::from(arg));
        }
    }

    let config = match config_path {
        Some(path) => ViewerConfig::load(&path)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?,
        None => ViewerConfig::default(),
    };

    let mut app = TerminalApp::new(config)?;

    if files.is_empty() {
        println!("No files given, loading a sample cube...");
        let sample = stl::to_binary(&Mesh::cube(2.0), "cadview sample cube");
        if let Err(err) = app.session().upload("cube.stl", sample) {
            eprintln!("sample cube: {}", err);
        }
    }
    for path in &files {
        match app.load_file(path)? {
            Ok(id) => println!("Loaded {} as node {}", path.display(), id),
            Err(err) => eprintln!("{}: {}", path.display(), err),
        }
    }

    println!("Starting terminal viewer (press Q to quit)...");
    std::thread::sleep(std::time::Duration::from_secs(1));

    app.run()?;

    println!("Thank you for using CADview!");
    Ok(())
}
