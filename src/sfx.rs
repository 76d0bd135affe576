//! One-shot sound effects.
//!
//! Effects are fully pre-decoded at bank load: each bank entry is a sample
//! whose single mixer buffer holds the entire decoded effect. Playback
//! binds that buffer statically to one of the effect channels and fires
//! it. The streaming task is never involved, so the effect path needs no
//! locking beyond the channel's own slot mutex, taken only from the caller
//! thread.

use std::sync::Arc;

use crate::decoder::SoundLoader;
use crate::error::{Error, Result};
use crate::mixer::{SharedMixer, SourceState};
use crate::stream::{NUM_SFX_CHANNELS, NoCallbacks, SFX_BUFFERS, Sample, Shared};

/// World-to-listener distance divisor.
pub const SFX_ATTENUATION: f32 = 160.0;
/// Sources closer than this are pushed back out to it.
pub const SFX_MIN_DISTANCE: f32 = 0.5;
/// Where non-positional effects play from.
pub const SFX_NON_POSITIONAL: [f32; 3] = [0.0, 0.0, -1.0];

/// Where an effect plays from, in world coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoundPos {
    /// False = play from the fixed non-positional spot.
    pub positional: bool,
    pub x: i32,
    pub y: i32,
}

/// A table of pre-decoded effects.
pub struct SoundBank {
    samples: Vec<Arc<Sample>>,
}

impl SoundBank {
    /// Decode every named effect into a one-buffer sample. Entries that
    /// fail to open or decode are skipped with a warning; a bank with no
    /// playable entries is an error.
    pub fn load(mixer: &SharedMixer, loader: &dyn SoundLoader, names: &[&str]) -> Result<Self> {
        let mut samples = Vec::with_capacity(names.len());
        for name in names {
            let mut decoder = match loader.open(name) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(target: "sfx", name, error = %e, "effect open failed");
                    continue;
                }
            };
            let (frequency, format) = (decoder.frequency(), decoder.format());
            let data = match decoder.decode_all() {
                Ok(d) if !d.is_empty() => d,
                Ok(_) => {
                    tracing::warn!(target: "sfx", name, "effect decoded to nothing");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(target: "sfx", name, error = %e, "effect decode failed");
                    continue;
                }
            };

            let sample = Sample::new(mixer.clone(), SFX_BUFFERS, Arc::new(NoCallbacks))?;
            mixer.upload(sample.buffers()[0], format, &data, frequency)?;
            let seconds = data.len() as f32 / (frequency as usize * format.frame_bytes()) as f32;
            sample.set_length(seconds);
            samples.push(sample);
            // The decoder is done; the bytes live in the mixer buffer now.
        }
        if samples.is_empty() {
            return Err(Error::invalid("sound bank has no playable entries"));
        }
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Arc<Sample>> {
        self.samples.get(index)
    }

    pub(crate) fn contains(&self, sample: &Arc<Sample>) -> bool {
        self.samples.iter().any(|s| Arc::ptr_eq(s, sample))
    }
}

/// Map a world position to mixer coordinates. Close positions are pushed
/// out to the minimum distance so attenuation stays sane.
pub(crate) fn position_vector(pos: SoundPos, positional_enabled: bool) -> [f32; 3] {
    if !pos.positional || !positional_enabled {
        return SFX_NON_POSITIONAL;
    }
    let x = pos.x as f32 / SFX_ATTENUATION;
    let z = pos.y as f32 / SFX_ATTENUATION;
    let magnitude = (x * x + z * z).sqrt();
    if magnitude < SFX_MIN_DISTANCE {
        if magnitude > 0.0 {
            let scale = SFX_MIN_DISTANCE / magnitude;
            [x * scale, 0.0, z * scale]
        } else {
            [0.0, 0.0, -SFX_MIN_DISTANCE]
        }
    } else {
        [x, 0.0, z]
    }
}

/// Start an effect on `channel`. Reclaims finished channels bank-wide
/// first, then binds the sample's buffer and fires the source.
pub(crate) fn play_channel(
    shared: &Shared,
    positional_enabled: bool,
    channel: usize,
    bank: &SoundBank,
    index: usize,
    pos: SoundPos,
    object: Option<u64>,
) -> Result<()> {
    if channel >= NUM_SFX_CHANNELS {
        return Err(Error::invalid(format!("no such channel: {}", channel)));
    }
    let Some(sample) = bank.get(index) else {
        return Err(Error::invalid(format!("no such bank entry: {}", index)));
    };

    {
        let mut st = shared.slots[channel].state.lock();
        shared.stop_source_locked(channel, &mut st);
        st.sample = None;
    }
    check_finished_channels(shared);

    let source = shared.slots[channel].source;
    let mut st = shared.slots[channel].state.lock();
    st.sample = Some(sample.clone());
    st.positional_object = object;
    shared
        .mixer
        .set_position(source, position_vector(pos, positional_enabled))?;
    shared
        .mixer
        .set_gain(source, shared.channel_gain(st.channel_volume))?;
    shared.mixer.set_buffer(source, Some(sample.buffers()[0]))?;
    shared.mixer.play(source)?;
    Ok(())
}

pub(crate) fn stop_channel(shared: &Shared, channel: usize) -> Result<()> {
    if channel >= NUM_SFX_CHANNELS {
        return Err(Error::invalid(format!("no such channel: {}", channel)));
    }
    let mut st = shared.slots[channel].state.lock();
    shared.stop_source_locked(channel, &mut st);
    st.sample = None;
    Ok(())
}

pub(crate) fn channel_playing(shared: &Shared, channel: usize) -> bool {
    if channel >= NUM_SFX_CHANNELS {
        return false;
    }
    let _st = shared.slots[channel].state.lock();
    shared
        .mixer
        .source_state(shared.slots[channel].source)
        .map(|s| s == SourceState::Playing)
        .unwrap_or(false)
}

/// Return every effect channel whose source has stopped to the Initial
/// state, releasing its sample binding.
pub(crate) fn check_finished_channels(shared: &Shared) {
    for channel in 0..NUM_SFX_CHANNELS {
        let mut st = shared.slots[channel].state.lock();
        if st.sample.is_none() {
            continue;
        }
        let state = shared
            .mixer
            .source_state(shared.slots[channel].source)
            .unwrap_or(SourceState::Initial);
        if state == SourceState::Stopped {
            shared.clean_source_locked(channel, &mut st);
            st.sample = None;
        }
    }
}

/// Reposition a playing effect by its game object.
pub(crate) fn update_position(shared: &Shared, positional_enabled: bool, channel: usize, pos: SoundPos) {
    if channel >= NUM_SFX_CHANNELS {
        return;
    }
    let st = shared.slots[channel].state.lock();
    if st.sample.is_none() {
        return;
    }
    tracing::trace!(target: "sfx", channel, object = ?st.positional_object, "position update");
    let source = shared.slots[channel].source;
    if let Err(e) = shared
        .mixer
        .set_position(source, position_vector(pos, positional_enabled))
    {
        tracing::warn!(target: "sfx", channel, error = %e, "position update failed");
    }
}

pub(crate) fn set_channel_volume(shared: &Shared, channel: usize, volume: u32) {
    if channel >= NUM_SFX_CHANNELS {
        return;
    }
    let mut st = shared.slots[channel].state.lock();
    st.channel_volume = volume.min(crate::stream::MAX_VOLUME);
    let source = shared.slots[channel].source;
    if let Err(e) = shared
        .mixer
        .set_gain(source, shared.channel_gain(st.channel_volume))
    {
        tracing::warn!(target: "sfx", channel, error = %e, "channel gain set failed");
    }
}

/// Stop any channel still holding a bank sample, then let the bank drop.
pub(crate) fn release_bank(shared: &Shared, bank: SoundBank) {
    for channel in 0..NUM_SFX_CHANNELS {
        let mut st = shared.slots[channel].state.lock();
        let bound = st.sample.as_ref().is_some_and(|s| bank.contains(s));
        if bound {
            shared.stop_source_locked(channel, &mut st);
            st.sample = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::Mixer;
    use crate::test_utils::{MemoryLoader, TestRig};

    #[test]
    fn test_position_vector_mapping() {
        let pos = SoundPos {
            positional: true,
            x: 320,
            y: -160,
        };
        assert_eq!(position_vector(pos, true), [2.0, 0.0, -1.0]);
    }

    #[test]
    fn test_position_vector_min_distance() {
        let pos = SoundPos {
            positional: true,
            x: 16,
            y: 0,
        };
        let v = position_vector(pos, true);
        let mag = (v[0] * v[0] + v[2] * v[2]).sqrt();
        assert!((mag - SFX_MIN_DISTANCE).abs() < 1e-6);

        let origin = SoundPos {
            positional: true,
            x: 0,
            y: 0,
        };
        assert_eq!(position_vector(origin, true), [0.0, 0.0, -SFX_MIN_DISTANCE]);
    }

    #[test]
    fn test_position_vector_fallbacks() {
        let pos = SoundPos {
            positional: false,
            x: 320,
            y: 320,
        };
        assert_eq!(position_vector(pos, true), SFX_NON_POSITIONAL);
        // Positional request with stereo effects disabled.
        let pos = SoundPos {
            positional: true,
            x: 320,
            y: 320,
        };
        assert_eq!(position_vector(pos, false), SFX_NON_POSITIONAL);
    }

    #[test]
    fn test_bank_load_skips_bad_entries() {
        let rig = TestRig::new();
        let loader = MemoryLoader::new(&[("boom.wav", 2205 * 2)]);
        let bank = SoundBank::load(
            &rig.shared.mixer,
            &loader,
            &["missing.wav", "boom.wav"],
        )
        .unwrap();
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn test_bank_with_nothing_playable_fails() {
        let rig = TestRig::new();
        let loader = MemoryLoader::new(&[]);
        assert!(SoundBank::load(&rig.shared.mixer, &loader, &["a", "b"]).is_err());
    }

    #[test]
    fn test_play_channel_binds_and_fires() {
        let rig = TestRig::new();
        let loader = MemoryLoader::new(&[("boom.wav", 2205 * 2)]);
        let bank = SoundBank::load(&rig.shared.mixer, &loader, &["boom.wav"]).unwrap();

        play_channel(
            &rig.shared,
            true,
            0,
            &bank,
            0,
            SoundPos::default(),
            Some(42),
        )
        .unwrap();

        let source = rig.shared.slots[0].source;
        assert!(channel_playing(&rig.shared, 0));
        assert!(rig.mixer.bound_buffer(source).is_some());
        assert_eq!(rig.mixer.position(source), SFX_NON_POSITIONAL);
        let st = rig.shared.slots[0].state.lock();
        assert_eq!(st.positional_object, Some(42));
    }

    #[test]
    fn test_finished_channels_are_reclaimed() {
        let rig = TestRig::new();
        let loader = MemoryLoader::new(&[("boom.wav", 2205 * 2)]);
        let bank = SoundBank::load(&rig.shared.mixer, &loader, &["boom.wav"]).unwrap();
        play_channel(&rig.shared, true, 0, &bank, 0, SoundPos::default(), None).unwrap();

        // The effect runs out; the device parks the source on Stopped.
        let source = rig.shared.slots[0].source;
        rig.mixer.force_state(source, SourceState::Stopped);
        check_finished_channels(&rig.shared);

        let st = rig.shared.slots[0].state.lock();
        assert!(st.sample.is_none());
        assert_eq!(
            rig.mixer.source_state(source).unwrap(),
            SourceState::Initial
        );
        assert!(rig.mixer.bound_buffer(source).is_none());
    }

    #[test]
    fn test_bad_channel_is_soft_error() {
        let rig = TestRig::new();
        let loader = MemoryLoader::new(&[("boom.wav", 2205 * 2)]);
        let bank = SoundBank::load(&rig.shared.mixer, &loader, &["boom.wav"]).unwrap();
        assert!(play_channel(
            &rig.shared,
            true,
            NUM_SFX_CHANNELS,
            &bank,
            0,
            SoundPos::default(),
            None
        )
        .is_err());
        assert!(!channel_playing(&rig.shared, NUM_SFX_CHANNELS));
    }

    #[test]
    fn test_release_bank_stops_bound_channels() {
        let rig = TestRig::new();
        let loader = MemoryLoader::new(&[("boom.wav", 2205 * 2)]);
        let bank = SoundBank::load(&rig.shared.mixer, &loader, &["boom.wav"]).unwrap();
        play_channel(&rig.shared, true, 2, &bank, 0, SoundPos::default(), None).unwrap();

        release_bank(&rig.shared, bank);
        assert!(!channel_playing(&rig.shared, 2));
        assert!(rig.shared.slots[2].state.lock().sample.is_none());
    }
}
