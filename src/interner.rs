//! 全局字符串驻留器 (String Interner)
//!
//! 场景实体（物体、数据块、材质、灯光、粒子系统）的名字在每一轮同步中
//! 都会被反复哈希与比较。将名字驻留为整数 Symbol 之后，实体键的比较和
//! 哈希都是整数操作，也避免了在热路径上克隆字符串。

use lasso::{Spur, ThreadedRodeo};
use once_cell::sync::Lazy;

/// 全局驻留器实例
static INTERNER: Lazy<ThreadedRodeo> = Lazy::new(ThreadedRodeo::new);

/// 实体名 Symbol 类型别名
///
/// Name 是一个紧凑的整数标识符，可以高效地进行比较和哈希操作。
pub type Name = Spur;

/// 驻留一个名字，返回其 Symbol
///
/// 如果名字已存在于驻留池中，返回已有的 Symbol；
/// 否则将其加入驻留池并返回新的 Symbol。
#[inline]
pub fn name(s: &str) -> Name {
    INTERNER.get_or_intern(s)
}

/// 尝试获取已存在名字的 Symbol
///
/// 名字不在驻留池中时返回 None，不会分配新内存。
#[inline]
pub fn get(s: &str) -> Option<Name> {
    INTERNER.get(s)
}

/// 将 Symbol 解析回字符串
///
/// # Panics
/// 如果 Symbol 无效（通常不会发生），会 panic。
#[inline]
pub fn resolve(n: Name) -> &'static str {
    INTERNER.resolve(&n)
}
