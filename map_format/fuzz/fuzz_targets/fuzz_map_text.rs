#![no_main]

use libfuzzer_sys::fuzz_target;
use map_format::parse_map;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let parsed = parse_map(&text);
    for entity in &parsed.map.entities {
        for brush in &entity.brushes {
            for face in &brush.faces {
                let _ = face.plane();
            }
        }
    }
    let _ = parsed.map.player_starts();
});
