//! Builders for synthetic game data, shared by the test suites of all three
//! crates. Not part of the public API.
#![doc(hidden)]

use std::fs::File;
use std::io::Write;
use std::path::Path;

const NAME_LENGTH: usize = 12;
const DIRECTORY_RECORD_SIZE: usize = 1 + NAME_LENGTH + 4 + 4;

/// Write a well-formed `"CSid"` archive from (name, content) pairs.
pub fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let mut file = File::create(path).unwrap();
    file.write_all(b"CSid").unwrap();
    file.write_all(&(entries.len() as u16).to_le_bytes()).unwrap();

    let directory_size = entries.len() * DIRECTORY_RECORD_SIZE;
    let mut offset = (4 + 2 + directory_size) as u32;
    for (name, content) in entries {
        let mut record = [0u8; DIRECTORY_RECORD_SIZE];
        record[0] = name.len().min(NAME_LENGTH) as u8;
        record[1..1 + name.len().min(NAME_LENGTH)]
            .copy_from_slice(&name.as_bytes()[..name.len().min(NAME_LENGTH)]);
        record[13..17].copy_from_slice(&(content.len() as u32).to_le_bytes());
        record[17..21].copy_from_slice(&offset.to_le_bytes());
        file.write_all(&record).unwrap();
        offset += content.len() as u32;
    }
    for (_, content) in entries {
        file.write_all(content).unwrap();
    }
}

/// Single-triangle model body with the given frames of three vertices each.
pub fn build_model_body(frames: &[[[i16; 3]; 3]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&3u16.to_le_bytes()); // vertices
    out.extend_from_slice(&1u16.to_le_bytes()); // triangles
    out.extend_from_slice(&(frames.len() as u16).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // skin 2x2
    out.extend_from_slice(&2u16.to_le_bytes());

    for idx in [0u16, 1, 2] {
        out.extend_from_slice(&idx.to_le_bytes());
    }
    for _ in 0..6 {
        out.extend_from_slice(&0u16.to_le_bytes()); // uv
    }
    out.extend_from_slice(&0u16.to_le_bytes()); // flags

    out.extend_from_slice(&[9u8; 4]); // skin

    for frame in frames {
        for v in frame {
            for c in v {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
    }
    out
}

/// `.car` wrapper: animation table + sound table + body.
pub fn build_car_model(animations: &[(u16, u16)], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(animations.len() as u16).to_le_bytes());
    for (first, count) in animations {
        out.extend_from_slice(&first.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
    }
    for _ in 0..8 {
        out.extend_from_slice(&0u16.to_le_bytes());
    }
    out.extend_from_slice(body);
    out
}

/// Animation file appending `frame_count` frames of `vertex_count` identical
/// vertices.
pub fn build_animation_file(frame_count: u16, vertex_count: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&frame_count.to_le_bytes());
    for _ in 0..frame_count as usize * vertex_count as usize {
        for c in [0i16, 0, 0] {
            out.extend_from_slice(&c.to_le_bytes());
        }
    }
    out
}

/// Obj sprite of one `w x h` frame.
pub fn build_obj_file(w: u16, h: u16, x_center: u16, pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&w.to_le_bytes());
    out.extend_from_slice(&h.to_le_bytes());
    out.extend_from_slice(&x_center.to_le_bytes());
    out.extend_from_slice(pixels);
    out
}

/// Mono PCM RIFF/WAVE file.
pub fn build_wave(frequency: u32, bits: u16, channels: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&frequency.to_le_bytes());
    let byte_rate = frequency * channels as u32 * bits as u32 / 8;
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(channels * bits / 8).to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

pub struct MapFileBuilder {
    static_walls: Vec<u8>,
    static_wall_count: u16,
    dynamic_walls: Vec<u8>,
    dynamic_wall_count: u16,
    models: Vec<u8>,
    model_count: u16,
    spawns: Vec<u8>,
    spawn_count: u16,
    monsters: Vec<u8>,
    monster_count: u16,
    lights: Vec<u8>,
    light_count: u16,
    messages: Vec<u8>,
    message_count: u16,
}

fn push_coord(out: &mut Vec<u8>, c: f32) {
    out.extend_from_slice(&((c * 256.0) as i16).to_le_bytes());
}

impl MapFileBuilder {
    pub fn new() -> Self {
        MapFileBuilder {
            static_walls: Vec::new(),
            static_wall_count: 0,
            dynamic_walls: Vec::new(),
            dynamic_wall_count: 0,
            models: Vec::new(),
            model_count: 0,
            spawns: Vec::new(),
            spawn_count: 0,
            monsters: Vec::new(),
            monster_count: 0,
            lights: Vec::new(),
            light_count: 0,
            messages: Vec::new(),
            message_count: 0,
        }
    }

    fn push_wall(out: &mut Vec<u8>, x0: f32, y0: f32, x1: f32, y1: f32, texture_id: u8) {
        push_coord(out, x0);
        push_coord(out, y0);
        push_coord(out, x1);
        push_coord(out, y1);
        out.push(texture_id);
        out.push(0);
        out.push(1);
    }

    pub fn static_wall(mut self, x0: f32, y0: f32, x1: f32, y1: f32, texture_id: u8) -> Self {
        Self::push_wall(&mut self.static_walls, x0, y0, x1, y1, texture_id);
        self.static_wall_count += 1;
        self
    }

    pub fn dynamic_wall(mut self, x0: f32, y0: f32, x1: f32, y1: f32, texture_id: u8) -> Self {
        Self::push_wall(&mut self.dynamic_walls, x0, y0, x1, y1, texture_id);
        self.dynamic_wall_count += 1;
        self
    }

    pub fn model(mut self, x: f32, y: f32, z: f32, model_id: u8, flags: u8) -> Self {
        push_coord(&mut self.models, x);
        push_coord(&mut self.models, y);
        push_coord(&mut self.models, z);
        self.models.extend_from_slice(&0u16.to_le_bytes()); // angle
        self.models.push(model_id);
        self.models.push(flags);
        self.model_count += 1;
        self
    }

    pub fn spawn(mut self, x: f32, y: f32, direction: u16) -> Self {
        push_coord(&mut self.spawns, x);
        push_coord(&mut self.spawns, y);
        self.spawns.extend_from_slice(&direction.to_le_bytes());
        self.spawn_count += 1;
        self
    }

    pub fn monster(mut self, x: f32, y: f32, angle: u16, monster_type: u8) -> Self {
        push_coord(&mut self.monsters, x);
        push_coord(&mut self.monsters, y);
        self.monsters.extend_from_slice(&angle.to_le_bytes());
        self.monsters.push(monster_type);
        self.monsters.push(0); // reserved
        self.monster_count += 1;
        self
    }

    pub fn light(mut self, x: f32, y: f32, inner: f32, outer: f32, power: u8, max: u8) -> Self {
        push_coord(&mut self.lights, x);
        push_coord(&mut self.lights, y);
        push_coord(&mut self.lights, inner);
        push_coord(&mut self.lights, outer);
        self.lights.push(power);
        self.lights.push(max);
        self.light_count += 1;
        self
    }

    pub fn message(mut self, text: &str) -> Self {
        self.messages.push(text.len() as u8);
        self.messages.extend_from_slice(text.as_bytes());
        self.message_count += 1;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"CMAP");
        out.extend_from_slice(&self.static_wall_count.to_le_bytes());
        out.extend_from_slice(&self.static_walls);
        out.extend_from_slice(&self.dynamic_wall_count.to_le_bytes());
        out.extend_from_slice(&self.dynamic_walls);
        out.extend_from_slice(&self.model_count.to_le_bytes());
        out.extend_from_slice(&self.models);
        out.extend_from_slice(&self.spawn_count.to_le_bytes());
        out.extend_from_slice(&self.spawns);
        out.extend_from_slice(&self.monster_count.to_le_bytes());
        out.extend_from_slice(&self.monsters);
        out.extend_from_slice(&self.light_count.to_le_bytes());
        out.extend_from_slice(&self.lights);
        out.extend_from_slice(&self.message_count.to_le_bytes());
        out.extend_from_slice(&self.messages);
        out
    }
}

impl Default for MapFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Floor/ceiling grid file with uniform texture ids.
pub fn build_floors_file(floor_texture: u8, ceiling_texture: u8) -> Vec<u8> {
    let cells = crate::map::MAP_SIZE * crate::map::MAP_SIZE;
    let mut out = vec![floor_texture; cells];
    out.extend(std::iter::repeat(ceiling_texture).take(cells));
    out
}

pub const TEST_INF: &str = "\
[3D_OBJECTS]
1
64 1 0 0.5 3 0 10 2 7 BARREL.3O
[MONSTERS]
1
CROC.CAR 96 2048 1.8 2.0 120 20 5 150
[BLOWS]
1
1 0 0 1 0 0 1 BLOW1.OBJ
[BMP_OBJECTS]
1
1 0 0 0 0 0 TORCH.OBJ
[WEAPONS]
2
MODEL = HAND.3O
STAT = HANDSTAT.ANI
SHOOT = HANDSHOT.ANI
0 40 0.1 0.5 0 0 0 1
MODEL = SHOTG.3O
STAT = SGSTAT.ANI
SHOOT = SGSHOT.ANI
1 90 0.2 0.4 2 50 10 1
[ROCKETS]
1
3d_MODEL = ROCKET.3O
ANIMATION = ;
2 0.0 768 1 100 0 1 1 0 0 0 0
[GIBS]
1: = GIB1.3O s:12
#end
[SOUNDS]
0: = DOOR.WAV v:100
[SOUNDS_END]
";

const TEST_PROCESS: &str = "\
#procedure
trigger area 4.0 4.0 6.0 6.0
retriggerable
duration 1.0
movewall 0 0.0 0.0 2.0
sound 0 8.0 8.0
#end
#procedure
trigger area 30.0 30.0 31.0 31.0
message 1
winlevel
#end
";

const TEST_RESOURCE: &str = "\
#sky = SKY1.CEL
#newsounds
80: = LAVA.WAV v:90
#end
#ambients
0: = HUM.WAV v:40
#end
";

/// A minimal but complete archive good enough to boot the whole engine:
/// palette, manifest, models, sprites, sounds and one playable map (number 1,
/// a 16x16 walled room with a door, a barrel and two procedures).
pub fn write_test_archive(path: &Path) {
    let palette: Vec<u8> = (0..768u32).map(|i| (i % 64) as u8).collect();

    let body = build_model_body(&[
        [[0, 0, 0], [256, 0, 0], [0, 256, 0]],
        [[0, 0, 64], [256, 0, 64], [0, 256, 64]],
    ]);
    let car = build_car_model(&[(0, 2)], &body);
    let animation = build_animation_file(1, 3);
    let obj = build_obj_file(2, 2, 1, &[1, 2, 3, 4]);
    let wave = build_wave(11025, 8, 1, &[128, 200, 50]);

    let map_file = MapFileBuilder::new()
        .static_wall(1.0, 1.0, 16.0, 1.0, 5)
        .static_wall(16.0, 1.0, 16.0, 16.0, 5)
        .static_wall(16.0, 16.0, 1.0, 16.0, 5)
        .static_wall(1.0, 16.0, 1.0, 1.0, 5)
        .dynamic_wall(8.0, 1.0, 9.0, 1.0, 6)
        .model(12.0, 12.0, 0.0, 0, 0)
        .spawn(4.0, 4.0, 16384)
        .monster(13.0, 6.0, 32768, 0)
        .light(8.0, 8.0, 1.0, 6.0, 100, 255)
        .message("welcome to the rift")
        .message("the exit opens")
        .build();

    let floors = build_floors_file(1, 2);

    write_archive(
        path,
        &[
            ("CHASM2.PAL", &palette),
            ("CHASM.INF", TEST_INF.as_bytes()),
            ("BARREL.3O", &body),
            ("CROC.CAR", &car),
            ("HAND.3O", &body),
            ("SHOTG.3O", &body),
            ("HANDSTAT.ANI", &animation),
            ("HANDSHOT.ANI", &animation),
            ("SGSTAT.ANI", &animation),
            ("SGSHOT.ANI", &animation),
            ("ROCKET.3O", &body),
            ("GIB1.3O", &body),
            ("BLOW1.OBJ", &obj),
            ("TORCH.OBJ", &obj),
            ("DOOR.WAV", &wave),
            ("LAVA.WAV", &wave),
            ("HUM.WAV", &wave),
            ("MAP.01", &map_file),
            ("FLOORS.01", &floors),
            ("PROCESS.01", TEST_PROCESS.as_bytes()),
            ("RESOURCE.01", TEST_RESOURCE.as_bytes()),
        ],
    );
}
