//! 构造期错误
//!
//! 运行期的协议违例（状态不对、重复调用等）直接 panic；只有组件搭建时
//! 可能因参数不合法而失败的情况才走 `Result`。

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("output MTU {output} cannot carry input MTU {input}")]
    MtuMismatch { input: usize, output: usize },
    #[error("buffer capacity must be at least one packet")]
    ZeroCapacity,
    #[error("packet weight {weight} plus MTU {mtu} overflows the virtual clock")]
    WeightOverflow { weight: u64, mtu: usize },
}
