use std::{error::Error, fmt};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LaunchErrorKind {
    TypeNotSupport,
    TypeMismatch,
    RankMismatch,
    ShapeMismatch,
    StridesNotSupport,
    /// 当前后端尚未实现的功能组合。
    Unimplemented,
    /// 参数本身不合法，修正参数前不可重试。
    InvalidArgument,
    /// 硬件或厂商库报告的不可恢复错误。
    ExecutionFailed,
}

#[derive(Clone, Debug)]
pub struct LaunchError {
    pub kind: LaunchErrorKind,
    pub info: String,
}

/// 规划阶段与发射阶段共用同一套错误。
pub type SchemeError = LaunchError;

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.info)
    }
}

impl Error for LaunchError {}

pub(super) mod functions {
    use super::{LaunchError, LaunchErrorKind::*};

    macro_rules! builder {
        ($ty:ident: $name:ident $kind:expr) => {
            #[inline]
            pub fn $name(info: impl Into<String>) -> $ty {
                $ty {
                    kind: $kind,
                    info: info.into(),
                }
            }
        };
    }

    builder!(LaunchError: type_not_support    TypeNotSupport   );
    builder!(LaunchError: type_mismatch       TypeMismatch     );
    builder!(LaunchError: rank_mismatch       RankMismatch     );
    builder!(LaunchError: shape_mismatch      ShapeMismatch    );
    builder!(LaunchError: strides_not_support StridesNotSupport);
    builder!(LaunchError: unimplemented       Unimplemented    );
    builder!(LaunchError: invalid_argument    InvalidArgument  );

    builder!(LaunchError: execution_failed    ExecutionFailed  );
}

#[test]
fn test_display() {
    let e = functions::invalid_argument("cols(8) != 6");
    assert_eq!(e.kind, LaunchErrorKind::InvalidArgument);
    assert_eq!(e.to_string(), "InvalidArgument: cols(8) != 6");
}
