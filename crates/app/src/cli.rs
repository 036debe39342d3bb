use clap::Parser;

use crate::sorter::SorterCliArgs;

/// Colour-triggered sorting pipeline: watches a camera feed and fires a
/// servo when an object of the active colour class passes by.
#[derive(Debug, Parser)]
#[command(name = "brick-sorter", version)]
pub struct Cli {
    #[command(flatten)]
    pub sorter: SorterCliArgs,
}
