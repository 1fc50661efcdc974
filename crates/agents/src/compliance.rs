use std::env;
use std::sync::Arc;
use std::time::Duration;

use sop_core::policy::{FALLBACK_RESPONSE, TRANSPORT_APOLOGY};
use sop_core::{
    build_rewrite_message, build_user_message, ComplianceResult, GenerationAttempt,
    COMPLIANCE_SYSTEM_INSTRUCTION,
};
use sop_llm::{GenerationError, GenerationRequest, TextGenerator};
use sop_observability::AppMetrics;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub generate_temperature: f32,
    pub rewrite_temperature: f32,
    pub max_output_tokens: u32,
    pub call_timeout: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            generate_temperature: 0.7,
            rewrite_temperature: 0.5,
            max_output_tokens: 1000,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl LoopSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            generate_temperature: parse_var::<f32>("SOP_GENERATE_TEMPERATURE")
                .filter(|temperature| temperature.is_finite())
                .unwrap_or(defaults.generate_temperature),
            rewrite_temperature: parse_var::<f32>("SOP_REWRITE_TEMPERATURE")
                .filter(|temperature| temperature.is_finite())
                .unwrap_or(defaults.rewrite_temperature),
            max_output_tokens: parse_var("SOP_MAX_OUTPUT_TOKENS")
                .unwrap_or(defaults.max_output_tokens),
            call_timeout: parse_var::<u64>("SOP_GENERATION_TIMEOUT_SECONDS")
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
        }
        .normalized()
    }

    /// Clamps temperatures into the provider range and keeps the rewrite
    /// temperature strictly below the generate temperature.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if !self.generate_temperature.is_finite() {
            self.generate_temperature = defaults.generate_temperature;
        }
        if !self.rewrite_temperature.is_finite() {
            self.rewrite_temperature = defaults.rewrite_temperature;
        }
        self.generate_temperature = self.generate_temperature.clamp(0.1, 2.0);
        self.rewrite_temperature = self.rewrite_temperature.clamp(0.0, 2.0);
        if self.rewrite_temperature >= self.generate_temperature {
            self.rewrite_temperature = self.generate_temperature / 2.0;
        }
        self.max_output_tokens = self.max_output_tokens.max(1);
        self
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}

/// States of one compliance run. The transition graph is acyclic, so a run
/// makes at most two generation calls.
#[derive(Debug)]
enum LoopState {
    Init,
    Generate { user_message: String },
    Scan { attempt: GenerationAttempt },
    Rewrite { attempt: GenerationAttempt },
    Rescan { attempt: GenerationAttempt },
    Finalize { text: String, rewritten: bool },
    Fallback,
    Error { detail: String },
}

enum Step {
    Next(LoopState),
    Done(ComplianceResult),
}

pub struct ComplianceLoop<G> {
    generator: Arc<G>,
    settings: LoopSettings,
    metrics: Arc<AppMetrics>,
}

impl<G> ComplianceLoop<G>
where
    G: TextGenerator,
{
    pub fn new(generator: Arc<G>, settings: LoopSettings, metrics: Arc<AppMetrics>) -> Self {
        Self {
            generator,
            settings: settings.normalized(),
            metrics,
        }
    }

    /// Produces an answer for a question the intent gate already let through.
    /// Every path ends in a well-formed result carrying the disclaimer.
    pub async fn produce(&self, query: &str, context: Option<&str>) -> ComplianceResult {
        let mut state = LoopState::Init;
        loop {
            state = match self.step(state, query, context).await {
                Step::Next(next) => next,
                Step::Done(result) => return result,
            };
        }
    }

    async fn step(&self, state: LoopState, query: &str, context: Option<&str>) -> Step {
        match state {
            LoopState::Init => Step::Next(LoopState::Generate {
                user_message: build_user_message(query, context),
            }),
            LoopState::Generate { user_message } => {
                match self
                    .call(user_message, self.settings.generate_temperature)
                    .await
                {
                    Ok(text) => Step::Next(LoopState::Scan {
                        attempt: GenerationAttempt::scan(text),
                    }),
                    Err(err) => Step::Next(LoopState::Error {
                        detail: err.to_string(),
                    }),
                }
            }
            LoopState::Scan { attempt } => {
                if attempt.is_clean() {
                    Step::Next(LoopState::Finalize {
                        text: attempt.text,
                        rewritten: false,
                    })
                } else {
                    warn!(violations = ?attempt.violations, "compliance violation detected, requesting rewrite");
                    Step::Next(LoopState::Rewrite { attempt })
                }
            }
            LoopState::Rewrite { attempt } => {
                self.metrics.inc_rewrite();
                let message = build_rewrite_message(&attempt.violations, &attempt.text);
                match self
                    .call(message, self.settings.rewrite_temperature)
                    .await
                {
                    Ok(text) => Step::Next(LoopState::Rescan {
                        attempt: GenerationAttempt::scan(text),
                    }),
                    Err(err) => Step::Next(LoopState::Error {
                        detail: err.to_string(),
                    }),
                }
            }
            LoopState::Rescan { attempt } => {
                if attempt.is_clean() {
                    Step::Next(LoopState::Finalize {
                        text: attempt.text,
                        rewritten: true,
                    })
                } else {
                    warn!(violations = ?attempt.violations, "rewrite still violates compliance, using fallback");
                    Step::Next(LoopState::Fallback)
                }
            }
            LoopState::Finalize { text, rewritten } => {
                Step::Done(ComplianceResult::answered(&text, rewritten))
            }
            LoopState::Fallback => {
                self.metrics.inc_fallback();
                Step::Done(ComplianceResult::answered(FALLBACK_RESPONSE, true))
            }
            LoopState::Error { detail } => {
                self.metrics.inc_generation_error();
                error!(error = %detail, "text generation failed");
                Step::Done(ComplianceResult::failed(TRANSPORT_APOLOGY, detail))
            }
        }
    }

    async fn call(&self, user_message: String, temperature: f32) -> Result<String, GenerationError> {
        self.metrics.inc_generation_call();
        let request = GenerationRequest {
            system_instruction: COMPLIANCE_SYSTEM_INSTRUCTION.to_string(),
            user_message,
            temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };
        debug!(temperature, "calling text generation");

        match tokio::time::timeout(self.settings.call_timeout, self.generator.generate(&request))
            .await
        {
            Ok(result) => result.map(|generated| generated.text),
            Err(_) => Err(GenerationError::Timeout),
        }
    }
}
