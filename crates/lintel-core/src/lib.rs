pub mod availability;
pub mod cli;
pub mod config;
pub mod datetime;
pub mod header_group;
pub mod header_unit;
pub mod label;
pub mod observer;
pub mod render;
pub mod unit;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::header_group::HeaderGroup;
use crate::observer::TracingObserver;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting lintel CLI"
  );
  debug!(?pre.grid_overrides, "preprocessed grid overrides");

  let mut cfg = config::GridConfig::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre
      .grid_overrides
      .into_iter()
      .chain(
        cli
          .set_overrides
          .into_iter()
          .map(|kv| (kv.key, kv.value))
      )
      .chain(
        cli
          .start
          .map(|start| {
            ("start".to_string(), start)
          })
      )
  )?;

  let group_config = cfg
    .resolve(Utc::now())
    .context(
      "failed to resolve grid \
       configuration"
    )?;

  let mut group = HeaderGroup::new(
    group_config,
    TracingObserver
  );
  group.measure(
    cli.cell_width,
    cli.viewport_width
  );
  for direction in cli.scroll {
    if !group.scroll_to(direction) {
      info!(%direction, "scroll had no effect");
    }
  }

  let mut renderer =
    render::Renderer::new(!cli.no_color);
  if cli.json {
    renderer.print_json(&group)?;
  } else {
    renderer.print_grid(&group)?;
  }

  info!("done");
  Ok(())
}
