//! Sound channel state shared with the platform audio driver.
//!
//! The driver owns a mixer thread that calls [`SoundEngine::fill_buffer`] at
//! times of its choosing; the game thread starts and stops sounds. The
//! channel array lives behind one mutex, acquired in scopes on both sides, so
//! release happens on every exit path.

use std::sync::{Arc, Mutex};

use glam::Vec2;

use chasm_core::resources::{load_sound, GameResourcesPtr, SoundData, SoundDescription};
use chasm_core::resources::MAX_GLOBAL_SOUNDS;

pub const CHANNEL_COUNT: usize = 16;
pub const MIX_FREQUENCY: u32 = 22_050;

/// Sounds past this distance are inaudible.
const MAX_HEARING_DISTANCE: f32 = 24.0;

#[derive(Clone, Copy, Default)]
pub struct Channel {
    pub active: bool,
    pub sound_id: u16,
    pub position_sample: usize,
    pub looped: bool,
    /// 0..=255 per side.
    pub volume: [u8; 2],
}

pub struct SoundEngine {
    game_resources: GameResourcesPtr,
    channels: Arc<Mutex<[Channel; CHANNEL_COUNT]>>,
    /// Sounds numbered from [`MAX_GLOBAL_SOUNDS`], swapped on map change.
    map_sounds: Vec<SoundDescription>,
    map_sounds_data: Vec<SoundData>,
    listener_pos: Vec2,
    listener_angle: f32,
}

impl SoundEngine {
    pub fn new(game_resources: GameResourcesPtr) -> SoundEngine {
        SoundEngine {
            game_resources,
            channels: Arc::new(Mutex::new([Channel::default(); CHANNEL_COUNT])),
            map_sounds: Vec::new(),
            map_sounds_data: Vec::new(),
            listener_pos: Vec2::ZERO,
            listener_angle: 0.0,
        }
    }

    /// Decode the per-map sound overrides; called on map change.
    pub fn load_map_sounds(&mut self, descriptions: &[SoundDescription]) {
        self.map_sounds = descriptions.to_vec();
        self.map_sounds_data = descriptions
            .iter()
            .map(|d| {
                if d.file_name.is_empty() {
                    SoundData::empty()
                } else {
                    load_sound(&self.game_resources.vfs.read_file(&format!(
                        "SOUNDS/{}",
                        d.file_name
                    )))
                }
            })
            .collect();
    }

    fn sound_description(&self, sound_id: u16) -> Option<&SoundDescription> {
        let id = sound_id as usize;
        if id >= MAX_GLOBAL_SOUNDS {
            self.map_sounds.get(id - MAX_GLOBAL_SOUNDS)
        } else {
            self.game_resources.sounds.get(id)
        }
    }

    fn sound_data(&self, sound_id: u16) -> Option<&SoundData> {
        let id = sound_id as usize;
        if id >= MAX_GLOBAL_SOUNDS {
            self.map_sounds_data.get(id - MAX_GLOBAL_SOUNDS)
        } else {
            self.game_resources.sounds_data.get(id)
        }
    }

    /// Handle for the audio driver; it may outlive individual maps but not
    /// the engine.
    pub fn channels_handle(&self) -> Arc<Mutex<[Channel; CHANNEL_COUNT]>> {
        Arc::clone(&self.channels)
    }

    pub fn set_listener(&mut self, pos: Vec2, angle: f32) {
        self.listener_pos = pos;
        self.listener_angle = angle;
    }

    fn spatial_volume(&self, source: Vec2, base_volume: u32) -> [u8; 2] {
        let to_source = source - self.listener_pos;
        let distance = to_source.length();
        if distance >= MAX_HEARING_DISTANCE {
            return [0, 0];
        }
        let attenuated = base_volume as f32 * (1.0 - distance / MAX_HEARING_DISTANCE);

        // Simple constant-power pan from the listener-relative direction.
        let side = if distance > 0.01 {
            let right = Vec2::new(self.listener_angle.cos(), self.listener_angle.sin());
            (to_source / distance).dot(right)
        } else {
            0.0
        };
        let left = attenuated * (1.0 - side).min(1.0).max(0.25);
        let right = attenuated * (1.0 + side).min(1.0).max(0.25);
        [left.min(255.0) as u8, right.min(255.0) as u8]
    }

    /// Start a positional one-shot; steals the first free channel, silently
    /// drops the sound when all are busy.
    pub fn play_sound_at(&self, sound_id: u16, source: Vec2) {
        let volume = self
            .sound_description(sound_id)
            .map(|d| d.volume * 2)
            .unwrap_or(0);
        let volume = self.spatial_volume(source, volume);
        if volume == [0, 0] {
            return;
        }

        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.iter_mut().find(|c| !c.active) {
            *channel = Channel {
                active: true,
                sound_id,
                position_sample: 0,
                looped: false,
                volume,
            };
        }
    }

    pub fn play_head_sound(&self, sound_id: u16) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.iter_mut().find(|c| !c.active) {
            *channel = Channel {
                active: true,
                sound_id,
                position_sample: 0,
                looped: false,
                volume: [192, 192],
            };
        }
    }

    pub fn stop_all(&self) {
        let mut channels = self.channels.lock().unwrap();
        for channel in channels.iter_mut() {
            channel.active = false;
        }
    }

    pub fn active_channel_count(&self) -> usize {
        self.channels.lock().unwrap().iter().filter(|c| c.active).count()
    }

    /// Mixer callback: interleaved stereo. Runs on the driver's thread; the
    /// lock scope covers exactly one buffer fill.
    pub fn fill_buffer(&self, out: &mut [i16]) {
        out.fill(0);
        let mut channels = self.channels.lock().unwrap();

        for channel in channels.iter_mut() {
            if !channel.active {
                continue;
            }
            let Some(sound) = self.sound_data(channel.sound_id) else {
                channel.active = false;
                continue;
            };
            if sound.is_empty() {
                channel.active = false;
                continue;
            }

            for frame in out.chunks_exact_mut(2) {
                if channel.position_sample >= sound.samples.len() {
                    if channel.looped {
                        channel.position_sample = 0;
                    } else {
                        channel.active = false;
                        break;
                    }
                }
                let sample = sound.samples[channel.position_sample] as i32;
                channel.position_sample += 1;

                for (side, slot) in frame.iter_mut().enumerate() {
                    let mixed =
                        *slot as i32 + sample * channel.volume[side] as i32 / 255;
                    *slot = mixed.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                }
            }
        }
    }
}
