//! アドレスパターンによるディスパッチ表

use std::panic::{self, AssertUnwindSafe};

use rosc::{OscMessage, OscPacket};
use tracing::warn;

use crate::error::{HandlerError, TransportError};

use super::address::AddressPattern;

pub type Handler = Box<dyn Fn(&OscMessage) -> anyhow::Result<()> + Send + Sync>;

struct Route {
    pattern: AddressPattern,
    seq: u64,
    handler: Handler,
}

/// メッセージ 1 件のディスパッチ結果
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub matched: usize,
    pub failed: Vec<HandlerError>,
}

/// 順序付きパターン表。
///
/// 受信アドレスにマッチする全ルートを呼ぶ。具体的なパターンほど先で、同順位なら登録順。
/// 失敗やパニックしたハンドラはログに出し、他のハンドラは止めない。
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    next_seq: u64,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn register<F>(&mut self, pattern: &str, handler: F) -> Result<(), TransportError>
    where
        F: Fn(&OscMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let pattern = AddressPattern::parse(pattern)?;
        let seq = self.next_seq;
        self.next_seq += 1;

        let key = (pattern.specificity(), seq);
        let pos = self
            .routes
            .partition_point(|r| (r.pattern.specificity(), r.seq) < key);
        self.routes.insert(
            pos,
            Route {
                pattern,
                seq,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    /// `address` にマッチするパターン (呼び出し順)
    pub fn matching(&self, address: &str) -> Vec<&str> {
        self.routes
            .iter()
            .filter(|r| r.pattern.matches(address))
            .map(|r| r.pattern.as_str())
            .collect()
    }

    pub fn dispatch(&self, msg: &OscMessage) -> DispatchReport {
        let mut report = DispatchReport::default();
        for route in self.routes.iter().filter(|r| r.pattern.matches(&msg.addr)) {
            report.matched += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (route.handler)(msg)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => panic_message(payload.as_ref()),
            };
            let err = HandlerError {
                pattern: route.pattern.to_string(),
                addr: msg.addr.clone(),
                reason,
            };
            warn!("{}", err);
            report.failed.push(err);
        }
        report
    }

    /// パケット内の全メッセージをディスパッチする。バンドルは順に展開
    pub fn dispatch_packet(&self, packet: &OscPacket) -> DispatchReport {
        match packet {
            OscPacket::Message(msg) => self.dispatch(msg),
            OscPacket::Bundle(bundle) => {
                let mut report = DispatchReport::default();
                for inner in &bundle.content {
                    let r = self.dispatch_packet(inner);
                    report.matched += r.matched;
                    report.failed.extend(r.failed);
                }
                report
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
