//! Invocation of the external codec tools.
//!
//! | Tool        | Call                                      | I/O                         |
//! |-------------|-------------------------------------------|-----------------------------|
//! | `encode`    | `encode -z<zoom> -o <out>`                | CSV on stdin                |
//! | `merge`     | `merge [-u] -o <out> <inputs...>`         | files                       |
//! | `enumerate` | `enumerate -z <zoom> <dir>`               | `<dir> <z> <x> <y>` lines   |
//! | `render`    | `render <flags> <dir> <z> <x> <y>`        | raw image on stdout         |
//! | `quantize`  | `quantize <args>`                         | stdin → compressed PNG      |
//!
//! Any non-zero exit is an error.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};

use datamap_core::{TileCoord, ToolConfig};

use crate::error::{tool_io_err, ToolError};

/// Whether a merge drops repeated points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplicates {
    Keep,
    Remove,
}

/// One enumerated tile: the artifact it is drawn from and its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileJob {
    pub source_dir: PathBuf,
    pub coord: TileCoord,
}

/// Settings for one render pass over the pyramid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPass {
    /// Highest zoom enumerated in this pass.
    pub max_zoom: u8,
    /// Extra `render` flags appended after the configured ones.
    pub extra_args: Vec<String>,
    /// File name suffix before `.png`.
    pub suffix: String,
    /// Human label for progress messages.
    pub label: &'static str,
}

impl RenderPass {
    /// Every zoom level at the default tile size.
    pub fn standard(max_zoom: u8) -> Self {
        Self {
            max_zoom,
            extra_args: Vec::new(),
            suffix: String::new(),
            label: "tile",
        }
    }

    /// The zoom-0 front-page tile at 512px, saved as `0/0/0@2x.png`.
    pub fn high_resolution() -> Self {
        Self {
            max_zoom: 0,
            extra_args: vec!["-T".to_string(), "512".to_string()],
            suffix: "@2x".to_string(),
            label: "high-resolution tile",
        }
    }
}

/// The configured codec tools.
#[derive(Debug, Clone)]
pub struct Toolchain {
    tools: ToolConfig,
    encode_zoom: u8,
}

impl Toolchain {
    pub fn new(tools: ToolConfig, encode_zoom: u8) -> Self {
        Self { tools, encode_zoom }
    }

    /// Encode the CSV at `csv` into the index artifact `out`.
    pub fn encode(&self, csv: &Path, out: &Path) -> Result<(), ToolError> {
        let input = File::open(csv).map_err(|e| tool_io_err(csv, e))?;
        let mut cmd = Command::new(&self.tools.encode);
        cmd.arg(format!("-z{}", self.encode_zoom))
            .arg("-o")
            .arg(out)
            .stdin(Stdio::from(input));
        run(&self.tools.encode, cmd)?;
        Ok(())
    }

    /// Merge `inputs` into `out`.
    pub fn merge(
        &self,
        inputs: &[PathBuf],
        out: &Path,
        duplicates: Duplicates,
    ) -> Result<(), ToolError> {
        let mut cmd = Command::new(&self.tools.merge);
        if duplicates == Duplicates::Remove {
            cmd.arg("-u");
        }
        cmd.arg("-o").arg(out).args(inputs).stdin(Stdio::null());
        run(&self.tools.merge, cmd)?;
        Ok(())
    }

    /// List every tile in `dir` for zooms `0..=max_zoom`.
    pub fn enumerate(&self, dir: &Path, max_zoom: u8) -> Result<Vec<TileJob>, ToolError> {
        let mut cmd = Command::new(&self.tools.enumerate);
        cmd.arg("-z")
            .arg(max_zoom.to_string())
            .arg(dir)
            .stdin(Stdio::null());
        let output = run(&self.tools.enumerate, cmd)?;
        parse_tiles(&String::from_utf8_lossy(&output.stdout))
    }

    /// Render one tile through `render | quantize > <tiles_dir>/<z>/<x>/<y><suffix>.png`.
    ///
    /// The `<z>/<x>` directory must already exist. Returns the written path.
    /// A failed tile leaves no file behind.
    pub fn render_tile(
        &self,
        job: &TileJob,
        tiles_dir: &Path,
        pass: &RenderPass,
    ) -> Result<PathBuf, ToolError> {
        let out_path = tiles_dir.join(job.coord.image_path(&pass.suffix));
        let png = File::create(&out_path).map_err(|e| tool_io_err(&out_path, e))?;
        match self.pipe_tile(job, pass, png, &out_path) {
            Ok(()) => Ok(out_path),
            Err(err) => {
                if let Err(e) = std::fs::remove_file(&out_path) {
                    tracing::warn!(
                        path = %out_path.display(),
                        error = %e,
                        "failed to remove partial tile"
                    );
                }
                Err(err)
            }
        }
    }

    fn pipe_tile(
        &self,
        job: &TileJob,
        pass: &RenderPass,
        png: File,
        out_path: &Path,
    ) -> Result<(), ToolError> {
        let mut render = Command::new(&self.tools.render)
            .args(&self.tools.render_args)
            .args(&pass.extra_args)
            .arg(&job.source_dir)
            .arg(job.coord.zoom.to_string())
            .arg(job.coord.x.to_string())
            .arg(job.coord.y.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| spawn_err(&self.tools.render, source))?;

        // The quantizer takes ownership of the pipe's read end; once the
        // command below is dropped the parent holds no copy of it.
        let Some(raw) = render.stdout.take() else {
            reap(&mut render);
            return Err(ToolError::Spawn {
                program: program_name(&self.tools.render),
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "render stdout was not captured",
                ),
            });
        };
        let quantize = Command::new(&self.tools.quantize)
            .args(&self.tools.quantize_args)
            .stdin(Stdio::from(raw))
            .stdout(Stdio::from(png))
            .stderr(Stdio::null())
            .spawn();
        let mut quantize = match quantize {
            Ok(child) => child,
            Err(source) => {
                reap(&mut render);
                return Err(spawn_err(&self.tools.quantize, source));
            }
        };

        let quantized = match quantize.wait() {
            Ok(status) => status,
            Err(e) => {
                reap(&mut render);
                return Err(tool_io_err(out_path, e));
            }
        };
        let rendered = render.wait().map_err(|e| tool_io_err(out_path, e))?;

        for (program, status) in [
            (&self.tools.render, rendered),
            (&self.tools.quantize, quantized),
        ] {
            if !status.success() {
                return Err(ToolError::PipeExit {
                    program: program_name(program),
                    status,
                    tile: job.coord.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Parse enumerator output; blank lines are skipped.
pub fn parse_tiles(stdout: &str) -> Result<Vec<TileJob>, ToolError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let malformed = || ToolError::MalformedTile {
                line: line.to_string(),
            };
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [dir, zoom, x, y] = fields.as_slice() else {
                return Err(malformed());
            };
            Ok(TileJob {
                source_dir: PathBuf::from(*dir),
                coord: TileCoord::new(
                    zoom.parse().map_err(|_| malformed())?,
                    x.parse().map_err(|_| malformed())?,
                    y.parse().map_err(|_| malformed())?,
                ),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

fn program_name(program: &Path) -> String {
    program.display().to_string()
}

fn spawn_err(program: &Path, source: std::io::Error) -> ToolError {
    ToolError::Spawn {
        program: program_name(program),
        source,
    }
}

/// Run to completion with captured output; non-zero exit is an error.
fn run(program: &Path, mut cmd: Command) -> Result<Output, ToolError> {
    tracing::trace!(command = ?cmd, "running codec tool");
    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| spawn_err(program, source))?;
    if !output.status.success() {
        return Err(ToolError::Exit {
            program: program_name(program),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_four_field_lines() {
        let tiles = parse_tiles("/shapes 0 0 0\n\n/shapes 3 5 2\n").unwrap();
        assert_eq!(
            tiles,
            vec![
                TileJob {
                    source_dir: PathBuf::from("/shapes"),
                    coord: TileCoord::new(0, 0, 0),
                },
                TileJob {
                    source_dir: PathBuf::from("/shapes"),
                    coord: TileCoord::new(3, 5, 2),
                },
            ]
        );
    }

    #[rstest]
    #[case("/shapes 0 0")]
    #[case("/shapes 0 0 0 extra")]
    #[case("/shapes z 0 0")]
    #[case("/shapes 1 -1 0")]
    fn rejects_malformed_lines(#[case] line: &str) {
        let err = parse_tiles(line).unwrap_err();
        assert!(matches!(err, ToolError::MalformedTile { .. }), "got: {err}");
    }

    #[test]
    fn high_resolution_pass_renders_zoom_zero_at_512() {
        let pass = RenderPass::high_resolution();
        assert_eq!(pass.max_zoom, 0);
        assert_eq!(pass.extra_args, ["-T", "512"]);
        assert_eq!(TileCoord::new(0, 0, 0).image_path(&pass.suffix), "0/0/0@2x.png");
    }

    #[cfg(unix)]
    mod with_fake_tools {
        use super::*;
        use crate::testing::{failing_tool, fake_tools};
        use tempfile::TempDir;

        fn toolchain() -> Toolchain {
            Toolchain::new(fake_tools(), 13)
        }

        #[test]
        fn encode_reads_csv_from_stdin() {
            let dir = TempDir::new().unwrap();
            let csv = dir.path().join("map_ne.csv");
            std::fs::write(&csv, "1.0,2.0\n3.0,4.0\n").unwrap();
            let out = dir.path().join("map_ne");

            toolchain().encode(&csv, &out).unwrap();
            assert_eq!(std::fs::read_to_string(&out).unwrap(), "1.0,2.0\n3.0,4.0\n");
        }

        #[test]
        fn merge_keeps_or_removes_duplicates() {
            let dir = TempDir::new().unwrap();
            let a = dir.path().join("a");
            let b = dir.path().join("b");
            std::fs::write(&a, "1,1\n2,2\n").unwrap();
            std::fs::write(&b, "2,2\n3,3\n").unwrap();
            let inputs = [a, b];

            let kept = dir.path().join("kept");
            toolchain().merge(&inputs, &kept, Duplicates::Keep).unwrap();
            assert_eq!(std::fs::read_to_string(&kept).unwrap().lines().count(), 4);

            let unique = dir.path().join("unique");
            toolchain()
                .merge(&inputs, &unique, Duplicates::Remove)
                .unwrap();
            assert_eq!(std::fs::read_to_string(&unique).unwrap().lines().count(), 3);
        }

        #[test]
        fn render_pipes_into_quantizer() {
            let dir = TempDir::new().unwrap();
            let shapes = dir.path().join("shapes");
            std::fs::write(&shapes, "1,1\n2,2\n").unwrap();
            let tiles = dir.path().join("tiles");
            std::fs::create_dir_all(tiles.join("2/1")).unwrap();

            let job = TileJob {
                source_dir: shapes,
                coord: TileCoord::new(2, 1, 3),
            };
            let path = toolchain()
                .render_tile(&job, &tiles, &RenderPass::standard(2))
                .unwrap();

            assert_eq!(path, tiles.join("2/1/3.png"));
            let png = std::fs::read_to_string(&path).unwrap();
            assert!(png.starts_with("png:"), "quantizer output: {png}");
            assert!(png.contains("tile 2/1/3 size=256 points=2"), "{png}");
        }

        #[test]
        fn non_zero_exit_is_an_error() {
            let dir = TempDir::new().unwrap();
            let mut tools = fake_tools();
            tools.merge = failing_tool();
            let err = Toolchain::new(tools, 13)
                .merge(&[dir.path().join("a")], &dir.path().join("b"), Duplicates::Keep)
                .unwrap_err();
            assert!(matches!(err, ToolError::Exit { .. }), "got: {err}");
        }

        #[test]
        fn failing_quantizer_fails_the_tile() {
            let dir = TempDir::new().unwrap();
            let shapes = dir.path().join("shapes");
            std::fs::write(&shapes, "").unwrap();
            std::fs::create_dir_all(dir.path().join("0/0")).unwrap();
            let mut tools = fake_tools();
            tools.quantize = failing_tool();

            let job = TileJob {
                source_dir: shapes,
                coord: TileCoord::new(0, 0, 0),
            };
            let err = Toolchain::new(tools, 13)
                .render_tile(&job, dir.path(), &RenderPass::standard(0))
                .unwrap_err();
            assert!(matches!(err, ToolError::PipeExit { .. }), "got: {err}");
            assert!(!dir.path().join("0/0/0.png").exists(), "partial tile left behind");
        }

        #[test]
        fn unspawnable_renderer_leaves_no_tile() {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join("1/0")).unwrap();
            let mut tools = fake_tools();
            tools.render = PathBuf::from("/nonexistent/render");

            let job = TileJob {
                source_dir: dir.path().join("shapes"),
                coord: TileCoord::new(1, 0, 1),
            };
            let err = Toolchain::new(tools, 13)
                .render_tile(&job, dir.path(), &RenderPass::standard(1))
                .unwrap_err();
            assert!(matches!(err, ToolError::Spawn { .. }), "got: {err}");
            assert!(!dir.path().join("1/0/1.png").exists());
        }

        #[test]
        fn missing_program_is_a_spawn_error() {
            let mut tools = fake_tools();
            tools.enumerate = PathBuf::from("/nonexistent/enumerate");
            let err = Toolchain::new(tools, 13)
                .enumerate(Path::new("/tmp"), 0)
                .unwrap_err();
            assert!(matches!(err, ToolError::Spawn { .. }), "got: {err}");
        }
    }
}
