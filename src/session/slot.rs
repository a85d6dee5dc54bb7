use crate::adapter::AdapterHandle;
use crate::youtube::PollHandle;

/// プラットフォームごとのアダプター枠
///
/// 状態遷移は `Session` の join / leave / disconnect 経由でのみ行う。
#[derive(Debug, Default)]
pub enum PlatformSlot {
    #[default]
    Empty,
    PushActive(AdapterHandle),
    PollActive(PollHandle),
}

impl PlatformSlot {
    pub fn is_empty(&self) -> bool {
        matches!(self, PlatformSlot::Empty)
    }

    /// アダプターが接続処理中または稼働中
    pub fn is_active(&self) -> bool {
        match self {
            PlatformSlot::Empty => false,
            PlatformSlot::PushActive(handle) => handle.is_active(),
            PlatformSlot::PollActive(handle) => handle.is_active(),
        }
    }

    /// 枠を空にしてアダプターを停止する
    ///
    /// 停止時点で稼働中だった場合にtrue（通知が必要かどうかの判定に使う）
    pub(super) fn teardown(&mut self) -> bool {
        match std::mem::take(self) {
            PlatformSlot::Empty => false,
            PlatformSlot::PushActive(handle) => handle.stop(),
            PlatformSlot::PollActive(handle) => handle.stop(),
        }
    }
}
