//! Nested bars, stage mode and `tracing` output routed between frames.
//!
//! Run with `cargo run --example tree`.

use std::{thread, time::Duration};

use nested_progress::{BarOptions, ProgressBar};

fn main() -> nested_progress::Result<()> {
    let root = ProgressBar::new("Release pipeline");
    tracing_subscriber::fmt()
        .with_writer(root.sink())
        .with_target(false)
        .init();

    let fetch = root.add_sub_bar("Fetch sources");
    let compile = root.add_sub_bar("Compile workspace crates and generate artifacts");
    let package = root.add_sub_bar("Package");
    let sign = package.add_child("Sign artifacts", BarOptions::new().with_stages(5));

    let handle = root.start_render_loop()?;

    for i in 0..=50 {
        tracing::info!(step = i, "working");

        root.increment(2);
        fetch.increment(4);
        compile.increment(2);

        if i == 3 {
            root.apply_options(BarOptions::new().with_stages(30));
            tracing::info!("signing done");
            sign.finish();
            package.add_child("Upload", BarOptions::new().with_stages(5));
        } else if i < 3 {
            sign.increment(1);
        }

        if i == 25 {
            fetch.finish();
        }

        thread::sleep(Duration::from_millis(200));
    }

    compile.finish();
    package.finish();
    root.finish();
    handle.stop();
    Ok(())
}
