//! Per-level data: parsing, compiled acceleration structures.
//!
//! A level is four virtual files, named by convention from the map number
//! (1..99): `MAP.NN` (geometry: walls, model placements, lights, message
//! table), `FLOORS.NN` (floor/ceiling texture grid), `PROCESS.NN` (trigger
//! procedures script, plain text) and `RESOURCE.NN` (per-map sound overrides
//! and the sky texture). The result is an immutable [`MapData`]; per-tick
//! state lives on the server.

pub mod bsp;
pub mod collision_index;
pub mod lightmap;

pub use bsp::MapBspTree;
pub use collision_index::{CollisionIndex, IndexElement, IndexElementKind};
pub use lightmap::{MapLightmaps, DYNAMIC_WALLS_ATLAS_ROW, WALL_LIGHTMAP_WIDTH};

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Result};
use glam::{Vec2, Vec3};

use crate::resources::{manifest, GameResourcesPtr, SoundDescription};
use crate::vfs::Vfs;

pub const MAP_SIZE: usize = 64;

/// Floor or ceiling cells with this texture id are open sky.
pub const EMPTY_FLOOR_TEXTURE_ID: u8 = 63;

/// Wall textures from this id up render double-sided and translucent.
pub const FIRST_TRANSPARENT_TEXTURE_ID: u8 = 86;

const MAP_MAGIC: &[u8; 4] = b"CMAP";

#[derive(Debug, Clone, Copy)]
pub struct Wall {
    pub vert_pos: [Vec2; 2],
    pub texture_id: u8,
    /// Texture u at each end, in texture columns.
    pub vert_tex_coord: [u8; 2],
}

pub const MODEL_FLAG_DYNAMIC: u8 = 1 << 0;
pub const MODEL_FLAG_ROTATING_LIGHT: u8 = 1 << 1;

#[derive(Debug, Clone, Copy)]
pub struct StaticModel {
    pub pos: Vec3,
    pub angle: f32,
    /// Index into the items list of the game resources.
    pub model_id: u8,
    pub is_dynamic: bool,
}

/// Per-map collision view of a placed model's description.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapModelDescription {
    pub radius: f32,
    /// Non-zero makes the model breakable; breakables stay out of the static
    /// collision index.
    pub blow_effect: u32,
    pub break_limit: u32,
    pub cast_shadow: bool,
    pub rotating_light: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerSpawn {
    pub pos: Vec2,
    pub direction: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct MonsterPlacement {
    /// Index into the monsters list of the game resources.
    pub monster_type: u8,
    pub pos: Vec2,
    pub angle: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct Light {
    pub pos: Vec2,
    pub inner_radius: f32,
    pub outer_radius: f32,
    pub power: f32,
    pub max_light_level: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerCondition {
    /// Fires when any player stands inside the rectangle.
    Area { min: Vec2, max: Vec2 },
    /// Fires when the given breakable model is destroyed.
    ModelBreak { model_index: u16 },
    /// Never fires by itself (chained or scripted elsewhere).
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcedureAction {
    /// Translate a dynamic wall; `delta.z` raises doors.
    MoveWall { wall_index: u16, delta: Vec3 },
    /// Rotate a dynamic wall around a pivot.
    RotateWall {
        wall_index: u16,
        center: Vec2,
        angle: f32,
    },
    ChangeWallTexture { wall_index: u16, texture_id: u8 },
    ChangeFloorTexture {
        cell: [u8; 2],
        texture_id: u8,
        ceiling: bool,
    },
    SpawnMonster {
        monster_type: u8,
        pos: Vec3,
        angle: u16,
    },
    PlaySound { sound_id: u8, pos: Vec2 },
    GiveKey { key_bit: u8 },
    Message { index: u16 },
    WinLevel,
}

#[derive(Debug, Clone)]
pub struct Procedure {
    pub condition: TriggerCondition,
    pub retriggerable: bool,
    /// Keys mask bits required for the trigger to fire.
    pub required_keys: u8,
    pub delay_s: f32,
    /// Dynamic-wall interpolation time.
    pub duration_s: f32,
    pub actions: Vec<ProcedureAction>,
}

pub struct MapData {
    pub number: u32,

    pub floor_textures: Vec<u8>,
    pub ceiling_textures: Vec<u8>,

    pub static_walls: Vec<Wall>,
    pub dynamic_walls: Vec<Wall>,
    pub static_models: Vec<StaticModel>,
    pub models_description: Vec<MapModelDescription>,
    pub player_spawns: Vec<PlayerSpawn>,
    pub monster_placements: Vec<MonsterPlacement>,
    pub lights: Vec<Light>,
    pub procedures: Vec<Procedure>,
    pub messages: Vec<String>,

    pub map_sounds: Vec<SoundDescription>,
    pub ambient_sounds: Vec<SoundDescription>,
    pub sky_texture_name: String,

    pub collision_index: CollisionIndex,
    pub bsp_tree: MapBspTree,
    pub lightmaps: MapLightmaps,
}

pub type MapDataPtr = Rc<MapData>;

impl MapData {
    /// Geometry-free map. Compiled structures are built over the empty
    /// geometry; callers populating geometry afterwards must rebuild them.
    pub fn empty(number: u32) -> MapData {
        let mut map = MapData {
            number,
            floor_textures: vec![EMPTY_FLOOR_TEXTURE_ID; MAP_SIZE * MAP_SIZE],
            ceiling_textures: vec![EMPTY_FLOOR_TEXTURE_ID; MAP_SIZE * MAP_SIZE],
            static_walls: Vec::new(),
            dynamic_walls: Vec::new(),
            static_models: Vec::new(),
            models_description: Vec::new(),
            player_spawns: Vec::new(),
            monster_placements: Vec::new(),
            lights: Vec::new(),
            procedures: Vec::new(),
            messages: Vec::new(),
            map_sounds: Vec::new(),
            ambient_sounds: Vec::new(),
            sky_texture_name: String::new(),
            collision_index: CollisionIndex::build_empty(),
            bsp_tree: MapBspTree::build_empty(),
            lightmaps: MapLightmaps::empty(),
        };
        map.collision_index = CollisionIndex::build(&map);
        map
    }

    pub fn floor_texture(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= MAP_SIZE as i32 || y >= MAP_SIZE as i32 {
            return EMPTY_FLOOR_TEXTURE_ID;
        }
        self.floor_textures[x as usize + y as usize * MAP_SIZE]
    }

    pub fn ceiling_texture(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= MAP_SIZE as i32 || y >= MAP_SIZE as i32 {
            return EMPTY_FLOOR_TEXTURE_ID;
        }
        self.ceiling_textures[x as usize + y as usize * MAP_SIZE]
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8> {
        let Some(&v) = self.bytes.get(self.pos) else {
            bail!("unexpected end of map file");
        };
        self.pos += 1;
        Ok(v)
    }

    fn u16(&mut self) -> Result<u16> {
        let Some(s) = self.bytes.get(self.pos..self.pos + 2) else {
            bail!("unexpected end of map file");
        };
        self.pos += 2;
        Ok(u16::from_le_bytes(s.try_into().unwrap()))
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    fn coord(&mut self) -> Result<f32> {
        Ok(self.i16()? as f32 / 256.0)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let Some(s) = self.bytes.get(self.pos..self.pos + len) else {
            bail!("unexpected end of map file");
        };
        self.pos += len;
        Ok(s)
    }
}

fn read_wall(r: &mut Reader) -> Result<Wall> {
    Ok(Wall {
        vert_pos: [
            Vec2::new(r.coord()?, r.coord()?),
            Vec2::new(r.coord()?, r.coord()?),
        ],
        texture_id: r.u8()?,
        vert_tex_coord: [r.u8()?, r.u8()?],
    })
}

fn parse_geometry(content: &[u8], map: &mut MapData) -> Result<()> {
    let mut r = Reader::new(content);
    if r.bytes(4)? != MAP_MAGIC {
        bail!("bad map file magic");
    }

    let static_wall_count = r.u16()?;
    for _ in 0..static_wall_count {
        let wall = read_wall(&mut r)?;
        map.static_walls.push(wall);
    }

    let dynamic_wall_count = r.u16()?;
    for _ in 0..dynamic_wall_count {
        let wall = read_wall(&mut r)?;
        map.dynamic_walls.push(wall);
    }

    let model_count = r.u16()?;
    for _ in 0..model_count {
        let pos = Vec3::new(r.coord()?, r.coord()?, r.coord()?);
        let angle = crate::messages::message_angle_to_angle(r.u16()?);
        let model_id = r.u8()?;
        let flags = r.u8()?;
        map.static_models.push(StaticModel {
            pos,
            angle,
            model_id,
            is_dynamic: flags & MODEL_FLAG_DYNAMIC != 0,
        });
        if flags & MODEL_FLAG_ROTATING_LIGHT != 0 {
            if let Some(d) = map.models_description.get_mut(model_id as usize) {
                d.rotating_light = true;
            }
        }
    }

    let spawn_count = r.u16()?;
    for _ in 0..spawn_count {
        map.player_spawns.push(PlayerSpawn {
            pos: Vec2::new(r.coord()?, r.coord()?),
            direction: r.u16()?,
        });
    }

    let monster_count = r.u16()?;
    for _ in 0..monster_count {
        let pos = Vec2::new(r.coord()?, r.coord()?);
        let angle = r.u16()?;
        let monster_type = r.u8()?;
        r.u8()?; // reserved
        map.monster_placements.push(MonsterPlacement {
            monster_type,
            pos,
            angle,
        });
    }

    let light_count = r.u16()?;
    for _ in 0..light_count {
        map.lights.push(Light {
            pos: Vec2::new(r.coord()?, r.coord()?),
            inner_radius: r.coord()?,
            outer_radius: r.coord()?,
            power: r.u8()? as f32,
            max_light_level: r.u8()? as f32,
        });
    }

    let message_count = r.u16()?;
    for _ in 0..message_count {
        let len = r.u8()? as usize;
        let text = r.bytes(len)?;
        map.messages.push(String::from_utf8_lossy(text).into_owned());
    }

    Ok(())
}

fn parse_floors(content: &[u8], map: &mut MapData) -> Result<()> {
    if content.len() < 2 * MAP_SIZE * MAP_SIZE {
        bail!("floors file too short");
    }
    map.floor_textures
        .copy_from_slice(&content[..MAP_SIZE * MAP_SIZE]);
    map.ceiling_textures
        .copy_from_slice(&content[MAP_SIZE * MAP_SIZE..2 * MAP_SIZE * MAP_SIZE]);
    Ok(())
}

fn parse_key_name(name: &str) -> Option<u8> {
    match name {
        "red" => Some(0),
        "green" => Some(1),
        "blue" => Some(2),
        _ => None,
    }
}

/// `#procedure .. #end` blocks, one directive per line. A malformed directive
/// voids its procedure but not the rest of the script.
fn parse_procedures(script: &str, map: &mut MapData) {
    let mut lines = script.lines();

    while let Some(line) = lines.next() {
        if !line.trim().starts_with("#procedure") {
            continue;
        }

        let mut procedure = Procedure {
            condition: TriggerCondition::None,
            retriggerable: false,
            required_keys: 0,
            delay_s: 0.0,
            duration_s: 0.0,
            actions: Vec::new(),
        };
        let mut good = true;

        for line in lines.by_ref() {
            let trimmed = line.trim();
            if trimmed.starts_with("#end") {
                break;
            }
            if trimmed.is_empty() || trimmed.starts_with(';') {
                continue;
            }

            let mut tokens = trimmed.split_whitespace();
            let directive = tokens.next().unwrap_or("");
            let parsed = parse_procedure_directive(directive, &mut tokens, &mut procedure);
            if parsed.is_none() {
                log::warn!("bad procedure directive \"{}\"", trimmed);
                good = false;
            }
        }

        if good {
            map.procedures.push(procedure);
        }
    }
}

fn parse_procedure_directive<'a>(
    directive: &str,
    tokens: &mut impl Iterator<Item = &'a str>,
    procedure: &mut Procedure,
) -> Option<()> {
    macro_rules! next_parse {
        ($ty:ty) => {
            tokens.next()?.parse::<$ty>().ok()?
        };
    }

    match directive {
        "trigger" => match tokens.next()? {
            "area" => {
                procedure.condition = TriggerCondition::Area {
                    min: Vec2::new(next_parse!(f32), next_parse!(f32)),
                    max: Vec2::new(next_parse!(f32), next_parse!(f32)),
                };
            }
            "model" => {
                procedure.condition = TriggerCondition::ModelBreak {
                    model_index: next_parse!(u16),
                };
            }
            _ => return None,
        },
        "retriggerable" => procedure.retriggerable = true,
        "requires_key" => {
            procedure.required_keys |= 1 << parse_key_name(tokens.next()?)?;
        }
        "delay" => procedure.delay_s = next_parse!(f32),
        "duration" => procedure.duration_s = next_parse!(f32),
        "movewall" => procedure.actions.push(ProcedureAction::MoveWall {
            wall_index: next_parse!(u16),
            delta: Vec3::new(next_parse!(f32), next_parse!(f32), next_parse!(f32)),
        }),
        "rotatewall" => procedure.actions.push(ProcedureAction::RotateWall {
            wall_index: next_parse!(u16),
            center: Vec2::new(next_parse!(f32), next_parse!(f32)),
            angle: next_parse!(f32),
        }),
        "changetexture" => procedure.actions.push(ProcedureAction::ChangeWallTexture {
            wall_index: next_parse!(u16),
            texture_id: next_parse!(u8),
        }),
        "changefloor" | "changeceiling" => {
            procedure.actions.push(ProcedureAction::ChangeFloorTexture {
                cell: [next_parse!(u8), next_parse!(u8)],
                texture_id: next_parse!(u8),
                ceiling: directive == "changeceiling",
            })
        }
        "spawnmonster" => procedure.actions.push(ProcedureAction::SpawnMonster {
            monster_type: next_parse!(u8),
            pos: Vec3::new(next_parse!(f32), next_parse!(f32), next_parse!(f32)),
            angle: next_parse!(u16),
        }),
        "sound" => procedure.actions.push(ProcedureAction::PlaySound {
            sound_id: next_parse!(u8),
            pos: Vec2::new(next_parse!(f32), next_parse!(f32)),
        }),
        "givekey" => procedure.actions.push(ProcedureAction::GiveKey {
            key_bit: parse_key_name(tokens.next()?)?,
        }),
        "message" => procedure.actions.push(ProcedureAction::Message {
            index: next_parse!(u16),
        }),
        "winlevel" => procedure.actions.push(ProcedureAction::WinLevel),
        _ => return None,
    }
    Some(())
}

fn parse_resources_file(content: &str, map: &mut MapData) {
    map.map_sounds = manifest::load_map_sounds_description(content);
    map.ambient_sounds = manifest::load_ambient_sounds_description(content);

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("#sky") {
            if let Some((_, value)) = rest.split_once('=') {
                map.sky_texture_name = value.trim().to_string();
            }
        }
    }
}

pub struct MapLoader {
    vfs: Rc<Vfs>,
    game_resources: GameResourcesPtr,
    last_loaded: RefCell<Option<(u32, MapDataPtr)>>,
}

impl MapLoader {
    pub fn new(vfs: Rc<Vfs>, game_resources: GameResourcesPtr) -> Self {
        MapLoader {
            vfs,
            game_resources,
            last_loaded: RefCell::new(None),
        }
    }

    pub fn load_map(&self, map_number: u32) -> Result<MapDataPtr> {
        if let Some((number, map)) = self.last_loaded.borrow().as_ref() {
            if *number == map_number {
                return Ok(Rc::clone(map));
            }
        }

        let geometry_content = self.vfs.read_file(&format!("MAP.{:02}", map_number));
        if geometry_content.is_empty() {
            bail!("map {:02} not found", map_number);
        }

        let mut map = MapData::empty(map_number);

        // Collision data for placed models mirrors the item descriptions.
        map.models_description = self
            .game_resources
            .items_description
            .iter()
            .map(|d| MapModelDescription {
                radius: d.radius,
                blow_effect: d.blow_up,
                break_limit: d.b_limit,
                cast_shadow: d.cast_shadow,
                rotating_light: false,
            })
            .collect();

        parse_geometry(&geometry_content, &mut map)?;

        let floors_content = self.vfs.read_file(&format!("FLOORS.{:02}", map_number));
        if !floors_content.is_empty() {
            parse_floors(&floors_content, &mut map)?;
        } else {
            log::warn!("no floors file for map {:02}", map_number);
        }

        let process_content = self.vfs.read_file(&format!("PROCESS.{:02}", map_number));
        if !process_content.is_empty() {
            parse_procedures(&String::from_utf8_lossy(&process_content), &mut map);
        }

        let resource_content = self.vfs.read_file(&format!("RESOURCE.{:02}", map_number));
        if !resource_content.is_empty() {
            parse_resources_file(&String::from_utf8_lossy(&resource_content), &mut map);
        }

        map.collision_index = CollisionIndex::build(&map);
        map.bsp_tree = MapBspTree::build(&map);
        map.lightmaps = MapLightmaps::build(&map);

        log::info!(
            "map {:02} loaded: {} walls ({} dynamic), {} models, {} procedures",
            map_number,
            map.static_walls.len(),
            map.dynamic_walls.len(),
            map.static_models.len(),
            map.procedures.len()
        );

        let map = Rc::new(map);
        *self.last_loaded.borrow_mut() = Some((map_number, Rc::clone(&map)));
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::load_game_resources;
    use crate::test_fixtures;

    #[test]
    fn full_map_loads_with_compiled_structures() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        test_fixtures::write_test_archive(&archive_path);

        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        let resources = load_game_resources(Rc::clone(&vfs)).unwrap();
        let loader = MapLoader::new(vfs, resources);

        let map = loader.load_map(1).unwrap();

        assert!(!map.static_walls.is_empty());
        assert_eq!(map.dynamic_walls.len(), 1);
        assert_eq!(map.static_models.len(), 1);
        assert_eq!(map.messages.len(), 2);
        assert_eq!(map.procedures.len(), 2);
        assert_eq!(map.floor_texture(5, 5), 1);
        assert_eq!(map.ceiling_texture(5, 5), 2);

        // Door procedure parsed whole.
        let door = &map.procedures[0];
        assert_eq!(
            door.condition,
            TriggerCondition::Area {
                min: Vec2::new(4.0, 4.0),
                max: Vec2::new(6.0, 6.0),
            }
        );
        assert!(door
            .actions
            .iter()
            .any(|a| matches!(a, ProcedureAction::MoveWall { wall_index: 0, .. })));

        // BSP and lightmaps exist over the parsed walls.
        assert!(map.bsp_tree.segment_count() >= map.static_walls.len());
        assert_eq!(map.lightmaps.floor.len(), MAP_SIZE * MAP_SIZE);

        // Second load hits the cache.
        let again = loader.load_map(1).unwrap();
        assert!(Rc::ptr_eq(&map, &again));
    }

    #[test]
    fn missing_map_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        test_fixtures::write_test_archive(&archive_path);

        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        let resources = load_game_resources(Rc::clone(&vfs)).unwrap();
        let loader = MapLoader::new(vfs, resources);

        assert!(loader.load_map(42).is_err());
    }
}
