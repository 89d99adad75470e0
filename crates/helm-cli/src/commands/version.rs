//! Version command implementation.

/// Version information for the CLI.
const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

pub fn run() {
    println!("{NAME} {VERSION}");
    println!();
    println!("Governed upgrades and proxy delegation for versioned systems.");
    println!();
    println!("Build info:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
}
