//! Tile render stage.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use datamap_core::{plural, StageContext};

use crate::error::{io_err, RenderError};
use crate::tools::{RenderPass, TileJob, Toolchain};

/// Render zooms `0..=max_zoom`, then the `@2x` front-page tile.
///
/// Returns the number of images written across both passes. Existing tiles
/// are overwritten in place; nothing under `tiles_dir` is removed.
pub fn render_tiles(
    stage: &StageContext,
    tools: Arc<Toolchain>,
    shapes_dir: &Path,
    tiles_dir: &Path,
    max_zoom: u8,
) -> Result<u64, RenderError> {
    let standard = render_pass(
        stage,
        tools.clone(),
        shapes_dir,
        tiles_dir,
        RenderPass::standard(max_zoom),
    )?;
    let high_res = render_pass(
        stage,
        tools,
        shapes_dir,
        tiles_dir,
        RenderPass::high_resolution(),
    )?;
    Ok(standard + high_res)
}

/// Enumerate and render every tile of one pass.
pub fn render_pass(
    stage: &StageContext,
    tools: Arc<Toolchain>,
    shapes_dir: &Path,
    tiles_dir: &Path,
    pass: RenderPass,
) -> Result<u64, RenderError> {
    let tiles = tools.enumerate(shapes_dir, pass.max_zoom)?;
    let label = pass.label;
    tracing::debug!("Rendering {} {label}{}...", tiles.len(), plural(tiles.len()));
    create_tile_dirs(&tiles, tiles_dir)?;

    let pool = stage.pool("render")?;
    let pass = Arc::new(pass);
    let jobs: Vec<_> = tiles
        .into_iter()
        .map(|job| {
            let tools = tools.clone();
            let pass = pass.clone();
            let dir: PathBuf = tiles_dir.to_path_buf();
            pool.submit(move |_| tools.render_tile(&job, &dir, &pass))
        })
        .collect();

    let report = stage
        .watcher::<PathBuf>()
        .on_progress(|rendered, fraction| {
            tracing::debug!(
                "  Rendered {rendered} {label}{} ({:.1}%)",
                plural(rendered),
                fraction * 100.0
            );
        })
        .watch(jobs)?;
    Ok(report.succeeded as u64)
}

/// Create each distinct `<zoom>/<x>` directory once, before dispatch.
fn create_tile_dirs(tiles: &[TileJob], tiles_dir: &Path) -> Result<(), RenderError> {
    let columns: BTreeSet<(u8, u32)> = tiles
        .iter()
        .map(|tile| (tile.coord.zoom, tile.coord.x))
        .collect();
    for (zoom, x) in columns {
        let dir = tiles_dir.join(zoom.to_string()).join(x.to_string());
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use datamap_core::TileCoord;
    use tempfile::TempDir;

    #[test]
    fn tile_columns_are_created_once() {
        let dir = TempDir::new().unwrap();
        let job = |z, x, y| TileJob {
            source_dir: PathBuf::from("shapes"),
            coord: TileCoord::new(z, x, y),
        };
        create_tile_dirs(&[job(0, 0, 0), job(3, 2, 1), job(3, 2, 5)], dir.path()).unwrap();
        assert!(dir.path().join("0/0").is_dir());
        assert!(dir.path().join("3/2").is_dir());
        assert_eq!(std::fs::read_dir(dir.path().join("3")).unwrap().count(), 1);
    }

    #[cfg(unix)]
    mod with_fake_tools {
        use super::*;
        use crate::error::ToolError;
        use crate::testing::{failing_tool, fake_tools};

        fn shapes(dir: &Path) -> PathBuf {
            let shapes = dir.join("shapes");
            std::fs::write(&shapes, "1,1\n2,2\n3,3\n").unwrap();
            shapes
        }

        #[test]
        fn renders_all_zooms_plus_high_resolution_tile() {
            let dir = TempDir::new().unwrap();
            let shapes = shapes(dir.path());
            let tiles = dir.path().join("tiles");
            let tools = Arc::new(Toolchain::new(fake_tools(), 13));

            // Zoom 0 has one tile, zooms 1 and 2 two each, plus 0/0/0@2x.
            let count = render_tiles(&StageContext::new(3), tools, &shapes, &tiles, 2).unwrap();
            assert_eq!(count, 6);

            for path in ["0/0/0.png", "1/0/0.png", "1/1/0.png", "2/1/0.png"] {
                let png = std::fs::read_to_string(tiles.join(path)).unwrap();
                assert!(png.contains("size=256 points=3"), "{path}: {png}");
            }
            let high_res = std::fs::read_to_string(tiles.join("0/0/0@2x.png")).unwrap();
            assert!(high_res.contains("tile 0/0/0 size=512"), "{high_res}");
        }

        #[test]
        fn a_failed_tile_aborts_the_stage() {
            let dir = TempDir::new().unwrap();
            let shapes = shapes(dir.path());
            let mut config = fake_tools();
            config.render = failing_tool();
            let tools = Arc::new(Toolchain::new(config, 13));

            let err = render_tiles(&StageContext::new(2), tools, &shapes, &dir.path().join("t"), 1)
                .unwrap_err();
            match err {
                RenderError::Job(job) => assert!(job.to_string().contains("exited"), "{job}"),
                other => panic!("expected job failure, got {other}"),
            }
        }

        #[test]
        fn enumerate_failure_is_reported_before_dispatch() {
            let dir = TempDir::new().unwrap();
            let mut config = fake_tools();
            config.enumerate = failing_tool();
            let tools = Arc::new(Toolchain::new(config, 13));

            let err = render_tiles(
                &StageContext::new(1),
                tools,
                &shapes(dir.path()),
                &dir.path().join("tiles"),
                3,
            )
            .unwrap_err();
            assert!(matches!(err, RenderError::Tool(ToolError::Exit { .. })), "got: {err}");
            assert!(!dir.path().join("tiles").exists());
        }
    }
}
