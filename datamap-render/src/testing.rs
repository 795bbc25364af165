//! POSIX shell stand-ins for the codec tools.
//!
//! Artifacts are plain text files of point lines, so results can be read
//! back directly:
//!
//! - `encode` copies stdin to `-o <out>`
//! - `merge` concatenates its inputs, or `sort -u`s them with `-u`
//! - `enumerate -z <zoom> <dir>` lists `0/0/0` and, for each zoom above
//!   zero, `<z>/0/0` and `<z>/1/0`
//! - `render` prints the tile position, tile size and the artifact's line
//!   count
//! - `quantize` prefixes its input with `png:`
//! - `merge-sigint` merges like `merge`, except with `-u`: it creates
//!   `<out>.waiting`, waits for `<out>.release`, then dies by SIGINT
//!
//! Scripts are written once per process. Writing an executable while other
//! test threads fork can make exec fail with "text file busy".

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use datamap_core::ToolConfig;

const ENCODE: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
cat > "$out"
"#;

const MERGE: &str = r#"#!/bin/sh
unique=0
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -u) unique=1; shift ;;
    -o) out="$2"; shift 2 ;;
    *) break ;;
  esac
done
if [ "$unique" = 1 ]; then
  sort -u "$@" > "$out"
else
  cat "$@" > "$out"
fi
"#;

const ENUMERATE: &str = r#"#!/bin/sh
zoom="$2"
dir="$3"
z=0
while [ "$z" -le "$zoom" ]; do
  echo "$dir $z 0 0"
  if [ "$z" -gt 0 ]; then
    echo "$dir $z 1 0"
  fi
  z=$((z + 1))
done
"#;

const RENDER: &str = r#"#!/bin/sh
size=256
while [ $# -gt 4 ]; do
  if [ "$1" = "-T" ]; then
    size="$2"
    shift
  fi
  shift
done
points=$(wc -l < "$1" | tr -d ' ')
printf 'tile %s/%s/%s size=%s points=%s\n' "$2" "$3" "$4" "$size" "$points"
"#;

const QUANTIZE: &str = r#"#!/bin/sh
printf 'png:'
cat
"#;

const MERGE_SIGINT: &str = r#"#!/bin/sh
unique=0
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -u) unique=1; shift ;;
    -o) out="$2"; shift 2 ;;
    *) break ;;
  esac
done
if [ "$unique" = 1 ]; then
  touch "$out.waiting"
  while [ ! -e "$out.release" ]; do sleep 0.05; done
  kill -INT $$
  exit 130
fi
cat "$@" > "$out"
"#;

const FAIL: &str = r#"#!/bin/sh
echo "simulated failure" >&2
exit 3
"#;

fn script_dir() -> &'static Path {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = std::env::temp_dir().join(format!("datamap-fake-tools-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create fake tool dir");
        for (name, body) in [
            ("encode", ENCODE),
            ("merge", MERGE),
            ("enumerate", ENUMERATE),
            ("render", RENDER),
            ("quantize", QUANTIZE),
            ("merge-sigint", MERGE_SIGINT),
            ("fail", FAIL),
        ] {
            let path = dir.join(name);
            std::fs::write(&path, body).expect("write fake tool");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod fake tool");
        }
        dir
    })
}

/// A tool config whose programs are the fake scripts, keeping the default
/// render and quantize arguments.
pub fn fake_tools() -> ToolConfig {
    let dir = script_dir();
    ToolConfig {
        encode: dir.join("encode"),
        merge: dir.join("merge"),
        enumerate: dir.join("enumerate"),
        render: dir.join("render"),
        quantize: dir.join("quantize"),
        ..ToolConfig::default()
    }
}

/// A program that writes to stderr and exits 3.
pub fn failing_tool() -> PathBuf {
    script_dir().join("fail")
}

/// A `merge` whose deduplicating run blocks until released, then is killed
/// by SIGINT, as a terminal Ctrl-C would.
pub fn merge_killed_by_sigint() -> PathBuf {
    script_dir().join("merge-sigint")
}
