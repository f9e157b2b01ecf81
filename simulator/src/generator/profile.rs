use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sigintcore::hardware::{Emitter, SimulatedScenario};
use sigintcore::records::BandAssignment;

/// Configuration for generating a synthetic RF environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Emitters always present in the scenario.
    pub emitters: Vec<Emitter>,
    /// Additional emitters placed at random inside the scanned bands.
    pub random_emitters: usize,
    pub min_power_db: f32,
    pub max_power_db: f32,
    pub noise_floor_db: f32,
    /// Largest hardware phase error per channel, in radians.
    pub max_phase_error_rad: f64,
    pub seed: u64,
    pub description: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            emitters: vec![Emitter::new(146.52e6, -45.0, 60.0)],
            random_emitters: 2,
            min_power_db: -70.0,
            max_power_db: -40.0,
            noise_floor_db: -90.0,
            max_phase_error_rad: 1.0,
            seed: 0,
            description: None,
        }
    }
}

fn random_emitter(rng: &mut StdRng, config: &GeneratorConfig, bands: &[BandAssignment]) -> Emitter {
    let band = &bands[rng.gen_range(0..bands.len())];
    let frequency_hz = if band.end_hz > band.start_hz {
        rng.gen_range(band.start_hz..band.end_hz)
    } else {
        band.start_hz
    };
    let power_db = if config.max_power_db > config.min_power_db {
        rng.gen_range(config.min_power_db..config.max_power_db)
    } else {
        config.min_power_db
    };
    Emitter::new(frequency_hz, power_db, rng.gen_range(0.0..360.0))
}

/// Builds the scenario for a `channel_count`-element array scanning `bands`.
pub fn build_scenario(
    config: &GeneratorConfig,
    bands: &[BandAssignment],
    channel_count: usize,
) -> anyhow::Result<SimulatedScenario> {
    if config.random_emitters > 0 && bands.is_empty() {
        anyhow::bail!("random emitters requested but no bands to place them in");
    }
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut emitters = config.emitters.clone();
    emitters.extend((0..config.random_emitters).map(|_| random_emitter(&mut rng, config, bands)));

    let max_error = config.max_phase_error_rad.abs();
    let phase_offsets = (0..channel_count)
        .map(|channel| {
            if channel == 0 || max_error == 0.0 {
                0.0
            } else {
                rng.gen_range(-max_error..max_error)
            }
        })
        .collect();

    Ok(SimulatedScenario {
        emitters,
        noise_floor_db: Some(config.noise_floor_db),
        seed: config.seed,
        phase_offsets,
        ..Default::default()
    })
}
