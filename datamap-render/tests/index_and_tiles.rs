#![cfg(all(unix, feature = "testing"))]

use std::fs;
use std::sync::Arc;

use datamap_core::StageContext;
use datamap_render::testing::fake_tools;
use datamap_render::{csv_to_quadtrees, merge_quadtrees, render_tiles, IndexCounts, Toolchain};
use tempfile::TempDir;

#[test]
fn csvs_become_a_rendered_pyramid() {
    let root = TempDir::new().expect("tempdir");
    let csv = root.path().join("csv");
    fs::create_dir_all(&csv).expect("csv dir");
    fs::write(csv.join("map_ne.csv"), "10,10\n20,20\n").expect("write");
    fs::write(csv.join("submap_sw_0001.csv"), "20,20\n-5,-5\n").expect("write");
    fs::write(csv.join("submap_sw_0002.csv"), "-6,-6\n").expect("write");

    let stage = StageContext::new(2);
    let tools = Arc::new(Toolchain::new(fake_tools(), 13));
    let quadtrees = root.path().join("quadtrees");
    let shapes = root.path().join("shapes");
    let tiles = root.path().join("tiles");

    let counts = csv_to_quadtrees(&stage, tools.clone(), &csv, &quadtrees).expect("encode");
    assert_eq!(
        counts,
        IndexCounts {
            csv_converted: 3,
            intermediate: 2,
            shard: 2,
        }
    );
    merge_quadtrees(&tools, &quadtrees, &shapes).expect("merge");

    // 20,20 appears in two shards and is merged away.
    let count = render_tiles(&stage, tools, &shapes, &tiles, 1).expect("render");
    assert_eq!(count, 4);
    let tile = fs::read_to_string(tiles.join("1/1/0.png")).expect("tile");
    assert_eq!(tile, "png:tile 1/1/0 size=256 points=4\n");
}
