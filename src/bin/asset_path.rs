#![forbid(unsafe_code)]

//! Prints the derived asset id and sharded storage path for each external id.

use anyhow::{Context, Result};
use clap::Parser;
use moodio_tools::asset_id::AssetNamespace;

#[derive(Debug, Parser)]
#[command(name = "asset_path", about = "Show derived asset ids and storage paths")]
struct AssetArgs {
    #[arg(required = true)]
    external_ids: Vec<String>,
    #[arg(long, default_value = "videos")]
    category: String,
    #[arg(long, default_value = "mp4")]
    extension: String,
    /// Name hashed into the namespace instead of the default.
    #[arg(long)]
    namespace: Option<String>,
}

fn describe(args: &AssetArgs) -> Result<Vec<String>> {
    let namespace = args
        .namespace
        .as_deref()
        .map(AssetNamespace::from_name)
        .unwrap_or_default();
    args.external_ids
        .iter()
        .map(|external_id| {
            let id = namespace
                .derive_id(external_id)
                .with_context(|| format!("deriving id for {external_id:?}"))?;
            let path = namespace.derive_path(external_id, &args.category, &args.extension)?;
            Ok(format!("{external_id}\t{id}\t{path}"))
        })
        .collect()
}

fn main() -> Result<()> {
    let args = AssetArgs::parse();
    for line in describe(&args)? {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_each_id() {
        let args = AssetArgs::try_parse_from([
            "asset_path",
            "TSdwYwc6MkoRxpwhHRvY",
            "--extension",
            ".mp4",
        ])
        .unwrap();
        assert_eq!(
            describe(&args).unwrap(),
            vec![
                "TSdwYwc6MkoRxpwhHRvY\tecfd1643-6360-5cf3-a976-d8d99030eb02\tvideos/ec/ecfd1643-6360-5cf3-a976-d8d99030eb02.mp4"
                    .to_string()
            ]
        );
    }

    #[test]
    fn blank_id_is_an_error() {
        let args = AssetArgs::try_parse_from(["asset_path", " "]).unwrap();
        assert!(describe(&args).is_err());
    }
}
