//! The read-only game database, loaded once at startup.
//!
//! Description lists come from `CHASM.INF`; parallel lists of decoded models,
//! sprites and sounds follow the description indices one to one. Per-map
//! sounds and textures are loaded lazily on map change, not here.

pub mod manifest;
pub mod model;
pub mod sound;
pub mod sprite;

pub use manifest::{
    BmpObjectDescription, GibDescription, ItemDescription, MonsterDescription, RocketDescription,
    SoundDescription, SpriteEffectDescription, WeaponDescription, MAX_AMBIENT_SOUNDS,
    MAX_GLOBAL_SOUNDS, MAX_MAP_SOUNDS,
};
pub use model::{load_model_car, load_model_o3, Model, ModelAnimation};
pub use sound::{load_sound, SoundData};
pub use sprite::{load_obj_sprite, ObjSprite};

use std::rc::Rc;

use anyhow::{bail, Result};

use crate::images::{load_palette, Palette};
use crate::vfs::Vfs;

pub const MANIFEST_FILE_NAME: &str = "CHASM.INF";

pub struct GameResources {
    pub vfs: Rc<Vfs>,
    pub palette: Palette,

    pub items_description: Vec<ItemDescription>,
    pub monsters_description: Vec<MonsterDescription>,
    pub sprites_effects_description: Vec<SpriteEffectDescription>,
    pub bmp_objects_description: Vec<BmpObjectDescription>,
    pub weapons_description: Vec<WeaponDescription>,
    pub rockets_description: Vec<RocketDescription>,
    pub gibs_description: Vec<GibDescription>,
    pub sounds: Vec<SoundDescription>,

    pub items_models: Vec<Model>,
    pub monsters_models: Vec<Model>,
    pub weapons_models: Vec<Model>,
    pub rockets_models: Vec<Model>,
    pub gibs_models: Vec<Model>,
    pub effects_sprites: Vec<ObjSprite>,
    pub bmp_objects_sprites: Vec<ObjSprite>,
    pub sounds_data: Vec<SoundData>,
}

pub type GameResourcesPtr = Rc<GameResources>;

fn load_items_models(vfs: &Vfs, resources: &mut GameResources) {
    for description in &resources.items_description {
        let model_content = vfs.read_file(&format!("MODELS/{}", description.model_file_name));
        let animation_content = if description.animation_file_name.is_empty() {
            Vec::new()
        } else {
            vfs.read_file(&format!("MODELS/{}", description.animation_file_name))
        };
        resources
            .items_models
            .push(load_model_o3(&model_content, &[&animation_content]));
    }
}

fn load_monsters_models(vfs: &Vfs, resources: &mut GameResources) {
    for description in &resources.monsters_description {
        let content = vfs.read_file(&format!("CARACTER/{}", description.model_file_name));
        resources.monsters_models.push(load_model_car(&content));
    }
}

fn load_weapons_models(vfs: &Vfs, resources: &mut GameResources) {
    for description in &resources.weapons_description {
        let model_content = vfs.read_file(&format!("MODELS/{}", description.model_file_name));
        let animation_content =
            vfs.read_file(&format!("ANI/WEAPON/{}", description.animation_file_name));
        let reloading_content = vfs.read_file(&format!(
            "ANI/WEAPON/{}",
            description.reloading_animation_file_name
        ));
        resources.weapons_models.push(load_model_o3(
            &model_content,
            &[&animation_content, &reloading_content],
        ));
    }
}

fn load_rockets_models(vfs: &Vfs, resources: &mut GameResources) {
    for description in &resources.rockets_description {
        if description.model_file_name.is_empty() {
            resources.rockets_models.push(Model::empty());
            continue;
        }
        let model_content = vfs.read_file(&format!("MODELS/{}", description.model_file_name));
        let animation_content = if description.animation_file_name.is_empty() {
            Vec::new()
        } else {
            vfs.read_file(&format!("ANI/{}", description.animation_file_name))
        };
        resources
            .rockets_models
            .push(load_model_o3(&model_content, &[&animation_content]));
    }
}

fn load_gibs_models(vfs: &Vfs, resources: &mut GameResources) {
    for description in &resources.gibs_description {
        if description.model_file_name.is_empty() {
            resources.gibs_models.push(Model::empty());
            continue;
        }
        let content = vfs.read_file(&format!("MODELS/{}", description.model_file_name));
        resources.gibs_models.push(load_model_o3(&content, &[]));
    }
}

fn load_effects_sprites(vfs: &Vfs, resources: &mut GameResources) {
    for description in &resources.sprites_effects_description {
        let content = vfs.read_file(&description.sprite_file_name);
        resources.effects_sprites.push(load_obj_sprite(&content));
    }
}

fn load_bmp_objects_sprites(vfs: &Vfs, resources: &mut GameResources) {
    for description in &resources.bmp_objects_description {
        let content = vfs.read_file(&description.sprite_file_name);
        resources.bmp_objects_sprites.push(load_obj_sprite(&content));
    }
}

fn load_sounds_data(vfs: &Vfs, resources: &mut GameResources) {
    for description in &resources.sounds {
        if description.file_name.is_empty() {
            resources.sounds_data.push(SoundData::empty());
            continue;
        }
        let content = vfs.read_file(&format!("SOUNDS/{}", description.file_name));
        resources.sounds_data.push(load_sound(&content));
    }
}

/// Load the whole game database eagerly. An unreadable manifest is fatal.
pub fn load_game_resources(vfs: Rc<Vfs>) -> Result<GameResourcesPtr> {
    let palette = load_palette(&vfs);

    let inf_content = vfs.read_file(MANIFEST_FILE_NAME);
    if inf_content.is_empty() {
        bail!("can not read {}", MANIFEST_FILE_NAME);
    }
    let inf = String::from_utf8_lossy(&inf_content).into_owned();

    let mut resources = GameResources {
        vfs: Rc::clone(&vfs),
        palette,
        items_description: manifest::load_items_description(&inf),
        monsters_description: manifest::load_monsters_description(&inf),
        sprites_effects_description: manifest::load_sprite_effects_description(&inf),
        bmp_objects_description: manifest::load_bmp_objects_description(&inf),
        weapons_description: manifest::load_weapons_description(&inf),
        rockets_description: manifest::load_rockets_description(&inf),
        gibs_description: manifest::load_gibs_description(&inf),
        sounds: manifest::load_sounds_description(&inf),
        items_models: Vec::new(),
        monsters_models: Vec::new(),
        weapons_models: Vec::new(),
        rockets_models: Vec::new(),
        gibs_models: Vec::new(),
        effects_sprites: Vec::new(),
        bmp_objects_sprites: Vec::new(),
        sounds_data: Vec::new(),
    };

    load_items_models(&vfs, &mut resources);
    load_monsters_models(&vfs, &mut resources);
    load_effects_sprites(&vfs, &mut resources);
    load_bmp_objects_sprites(&vfs, &mut resources);
    load_weapons_models(&vfs, &mut resources);
    load_rockets_models(&vfs, &mut resources);
    load_gibs_models(&vfs, &mut resources);
    load_sounds_data(&vfs, &mut resources);

    log::info!(
        "game resources loaded: {} items, {} monsters, {} weapons, {} rockets",
        resources.items_description.len(),
        resources.monsters_description.len(),
        resources.weapons_description.len(),
        resources.rockets_description.len()
    );

    Ok(Rc::new(resources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{write_archive, write_test_archive};

    #[test]
    fn database_lists_stay_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_test_archive(&archive_path);

        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        let resources = load_game_resources(vfs).unwrap();

        assert_eq!(
            resources.items_models.len(),
            resources.items_description.len()
        );
        assert_eq!(
            resources.monsters_models.len(),
            resources.monsters_description.len()
        );
        assert_eq!(
            resources.weapons_models.len(),
            resources.weapons_description.len()
        );
        assert_eq!(
            resources.rockets_models.len(),
            resources.rockets_description.len()
        );
        assert_eq!(
            resources.effects_sprites.len(),
            resources.sprites_effects_description.len()
        );
        assert_eq!(resources.sounds_data.len(), resources.sounds.len());

        // The monster model decoded with its animation table.
        assert_eq!(resources.monsters_models[0].frame_count, 2);
        // Weapon animations concatenated after the embedded frames.
        assert_eq!(resources.weapons_models[0].animations.len(), 3);
        // Sounds decode next to their descriptions.
        assert!(!resources.sounds_data[0].is_empty());
        assert!(resources.sounds_data[1].is_empty());
    }

    #[test]
    fn missing_manifest_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("CSM.BIN");
        write_archive(&archive_path, &[("CHASM2.PAL", &[0u8; 768])]);

        let vfs = Rc::new(Vfs::open(&archive_path, &[]).unwrap());
        assert!(load_game_resources(vfs).is_err());
    }
}
