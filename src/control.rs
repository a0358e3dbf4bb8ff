//! 音響エンジンへの受信コントロール
//!
//! ここではパースとルーティングだけを行い、再生は [`SoundEngine`] の実装が担う。

use std::sync::Arc;

use rosc::{OscMessage, OscType};
use thiserror::Error;

use crate::error::TransportError;
use crate::osc::message::float_arg;
use crate::osc::Router;

pub const PLAY_SOUND_ADDR: &str = "/play_sound";
pub const SET_VOLUME_ADDR: &str = "/set_volume";
pub const STOP_SOUND_ADDR: &str = "/stop_sound";
pub const STOP_ALL_ADDR: &str = "/stop_all";

#[derive(Error, Debug, PartialEq)]
pub enum ControlError {
    #[error("Unknown control address: {0}")]
    UnknownAddress(String),

    #[error("{addr}: expected {expected}, got {got} arguments")]
    Arity {
        addr: String,
        expected: usize,
        got: usize,
    },

    #[error("{addr}: argument {index} has wrong type")]
    ArgType { addr: String, index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    PlaySound { stem: String, path: String, volume: f32 },
    SetVolume { stem: String, volume: f32 },
    StopSound { stem: String },
    StopAll,
}

impl ControlCommand {
    pub fn from_message(msg: &OscMessage) -> Result<Self, ControlError> {
        let args = &msg.args;
        let arity = |expected: usize| -> Result<(), ControlError> {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ControlError::Arity {
                    addr: msg.addr.clone(),
                    expected,
                    got: args.len(),
                })
            }
        };
        let string = |index: usize| -> Result<String, ControlError> {
            match &args[index] {
                OscType::String(s) => Ok(s.clone()),
                _ => Err(ControlError::ArgType {
                    addr: msg.addr.clone(),
                    index,
                }),
            }
        };
        let float = |index: usize| -> Result<f32, ControlError> {
            float_arg(&args[index]).ok_or_else(|| ControlError::ArgType {
                addr: msg.addr.clone(),
                index,
            })
        };

        match msg.addr.as_str() {
            PLAY_SOUND_ADDR => {
                arity(3)?;
                Ok(Self::PlaySound {
                    stem: string(0)?,
                    path: string(1)?,
                    volume: float(2)?,
                })
            }
            SET_VOLUME_ADDR => {
                arity(2)?;
                Ok(Self::SetVolume {
                    stem: string(0)?,
                    volume: float(1)?,
                })
            }
            STOP_SOUND_ADDR => {
                arity(1)?;
                Ok(Self::StopSound { stem: string(0)? })
            }
            STOP_ALL_ADDR => {
                arity(0)?;
                Ok(Self::StopAll)
            }
            other => Err(ControlError::UnknownAddress(other.to_string())),
        }
    }

    pub fn to_message(&self) -> OscMessage {
        let (addr, args) = match self {
            Self::PlaySound { stem, path, volume } => (
                PLAY_SOUND_ADDR,
                vec![
                    OscType::String(stem.clone()),
                    OscType::String(path.clone()),
                    OscType::Float(*volume),
                ],
            ),
            Self::SetVolume { stem, volume } => (
                SET_VOLUME_ADDR,
                vec![OscType::String(stem.clone()), OscType::Float(*volume)],
            ),
            Self::StopSound { stem } => (STOP_SOUND_ADDR, vec![OscType::String(stem.clone())]),
            Self::StopAll => (STOP_ALL_ADDR, vec![]),
        };
        OscMessage {
            addr: addr.to_string(),
            args,
        }
    }
}

/// コントロールコマンドの受け手 (音響エンジン)
pub trait SoundEngine: Send + Sync {
    fn play_sound(&self, stem: &str, path: &str, volume: f32) -> anyhow::Result<()>;
    fn set_volume(&self, stem: &str, volume: f32) -> anyhow::Result<()>;
    fn stop_sound(&self, stem: &str) -> anyhow::Result<()>;
    fn stop_all(&self) -> anyhow::Result<()>;
}

fn apply(engine: &dyn SoundEngine, command: ControlCommand) -> anyhow::Result<()> {
    match command {
        ControlCommand::PlaySound { stem, path, volume } => engine.play_sound(&stem, &path, volume),
        ControlCommand::SetVolume { stem, volume } => engine.set_volume(&stem, volume),
        ControlCommand::StopSound { stem } => engine.stop_sound(&stem),
        ControlCommand::StopAll => engine.stop_all(),
    }
}

/// 4 つのコントロールアドレスを `engine` へ振り分ける
pub fn register_sound_engine(router: &mut Router, engine: Arc<dyn SoundEngine>) -> Result<(), TransportError> {
    for addr in [PLAY_SOUND_ADDR, SET_VOLUME_ADDR, STOP_SOUND_ADDR, STOP_ALL_ADDR] {
        let engine = Arc::clone(&engine);
        router.register(addr, move |msg| {
            let command = ControlCommand::from_message(msg)?;
            apply(engine.as_ref(), command)
        })?;
    }
    Ok(())
}

/// 指示をログに出すだけのエンジン
#[derive(Debug, Default)]
pub struct LoggingEngine;

impl SoundEngine for LoggingEngine {
    fn play_sound(&self, stem: &str, path: &str, volume: f32) -> anyhow::Result<()> {
        tracing::info!(stem = stem, path = path, volume = volume, "play_sound");
        Ok(())
    }

    fn set_volume(&self, stem: &str, volume: f32) -> anyhow::Result<()> {
        tracing::info!(stem = stem, volume = volume, "set_volume");
        Ok(())
    }

    fn stop_sound(&self, stem: &str) -> anyhow::Result<()> {
        tracing::info!(stem = stem, "stop_sound");
        Ok(())
    }

    fn stop_all(&self) -> anyhow::Result<()> {
        tracing::info!("stop_all");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl SoundEngine for Recorder {
        fn play_sound(&self, stem: &str, path: &str, volume: f32) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("play {} {} {}", stem, path, volume));
            Ok(())
        }
        fn set_volume(&self, stem: &str, volume: f32) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("volume {} {}", stem, volume));
            Ok(())
        }
        fn stop_sound(&self, stem: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("stop {}", stem));
            Ok(())
        }
        fn stop_all(&self) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("stop_all".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_parse_play_sound() {
        let msg = OscMessage {
            addr: "/play_sound".into(),
            args: vec![
                OscType::String("drums".into()),
                OscType::String("stems/drums.wav".into()),
                OscType::Float(0.8),
            ],
        };
        assert_eq!(
            ControlCommand::from_message(&msg),
            Ok(ControlCommand::PlaySound {
                stem: "drums".into(),
                path: "stems/drums.wav".into(),
                volume: 0.8,
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        let msg = OscMessage { addr: "/set_volume".into(), args: vec![OscType::String("bass".into())] };
        assert!(matches!(
            ControlCommand::from_message(&msg),
            Err(ControlError::Arity { expected: 2, got: 1, .. })
        ));

        let msg = OscMessage { addr: "/stop_sound".into(), args: vec![OscType::Int(1)] };
        assert!(matches!(
            ControlCommand::from_message(&msg),
            Err(ControlError::ArgType { index: 0, .. })
        ));

        let msg = OscMessage { addr: "/rewind".into(), args: vec![] };
        assert!(matches!(
            ControlCommand::from_message(&msg),
            Err(ControlError::UnknownAddress(_))
        ));
    }

    #[test]
    fn test_message_roundtrip() {
        let commands = [
            ControlCommand::SetVolume { stem: "vox".into(), volume: 0.5 },
            ControlCommand::StopSound { stem: "vox".into() },
            ControlCommand::StopAll,
        ];
        for command in commands {
            assert_eq!(ControlCommand::from_message(&command.to_message()), Ok(command));
        }
    }

    #[test]
    fn test_router_dispatches_to_engine() {
        let recorder = Arc::new(Recorder::default());
        let mut router = Router::new();
        register_sound_engine(&mut router, recorder.clone()).unwrap();

        router.dispatch(&ControlCommand::SetVolume { stem: "bass".into(), volume: 0.25 }.to_message());
        router.dispatch(&ControlCommand::StopAll.to_message());
        // 不正な引数はログのみでエンジンは呼ばれない
        let report = router.dispatch(&OscMessage { addr: "/stop_sound".into(), args: vec![] });
        assert_eq!(report.failed.len(), 1);

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["volume bass 0.25".to_string(), "stop_all".to_string()]
        );
    }
}
