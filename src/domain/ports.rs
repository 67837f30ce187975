use crate::domain::model::{FlowKind, IterationContext};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// 一次 iteration 的流量：送 request、跑 checks、記錄 metrics
#[async_trait]
pub trait Flow: Send + Sync {
    fn kind(&self) -> FlowKind;

    async fn iterate(&self, ctx: &IterationContext) -> Result<()>;
}
