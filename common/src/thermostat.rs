#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlDecision {
    TurnOn,
    TurnOff,
    /// Temperature climbs faster than half the hysteresis per second.
    SafetyCutoff { rate: f32 },
    Hold,
}

#[derive(Debug, Clone)]
pub struct ThermostatControl {
    target_temperature: f32,
    hysteresis: f32,
    previous_temperature: Option<f32>,
    previous_sample_ms: Option<u64>,
}

impl ThermostatControl {
    pub fn new(target_temperature: f32, hysteresis: f32) -> Self {
        Self {
            target_temperature,
            hysteresis,
            previous_temperature: None,
            previous_sample_ms: None,
        }
    }

    pub fn previous_temperature(&self) -> Option<f32> {
        self.previous_temperature
    }

    pub fn sample(&mut self, temperature: f32, now_ms: u64) -> ControlDecision {
        let rate = self.rate(temperature, now_ms);
        self.previous_temperature = Some(temperature);
        self.previous_sample_ms = Some(now_ms);

        if rate > 0.0 && rate >= 0.5 * self.hysteresis {
            return ControlDecision::SafetyCutoff { rate };
        }

        let lower_bound = self.target_temperature;
        let upper_bound = self.target_temperature + self.hysteresis;

        if (lower_bound..=upper_bound).contains(&temperature) {
            // Inside the band only the trend decides.
            if rate > 0.0 {
                ControlDecision::TurnOff
            } else if rate < 0.0 {
                ControlDecision::TurnOn
            } else {
                ControlDecision::Hold
            }
        } else if temperature > upper_bound {
            ControlDecision::TurnOff
        } else if temperature < lower_bound {
            ControlDecision::TurnOn
        } else {
            ControlDecision::Hold
        }
    }

    fn rate(&self, temperature: f32, now_ms: u64) -> f32 {
        match (self.previous_temperature, self.previous_sample_ms) {
            (Some(previous), Some(previous_ms)) if now_ms > previous_ms => {
                let elapsed_secs = (now_ms - previous_ms) as f32 / 1_000.0;
                (temperature - previous) / elapsed_secs
            }
            _ => 0.0,
        }
    }
}
