use rzisp_core::prelude::{IspError, IspResult};

/// Operating state of a staging-engine session.
///
/// Transitions: `Init --open--> Ready --submit--> Run --complete--> Ready
/// --close--> Init`. Every operation names the state it requires and
/// fails with `NotReady` from anywhere else.
///
/// # Example
/// ```rust
/// use rzisp_engine::state::OpState;
///
/// assert!(OpState::Ready.require(OpState::Ready).is_ok());
/// assert!(OpState::Init.require(OpState::Ready).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpState {
    /// No session; work memory and accelerator unclaimed.
    Init,
    /// Configured and idle; parameters may be staged.
    Ready,
    /// One accelerator job in flight; the parameter block is owned by the
    /// hardware until the completion arrives.
    Run,
}

impl OpState {
    /// Guard an operation on its required state.
    pub fn require(self, wanted: OpState) -> IspResult<()> {
        if self == wanted {
            Ok(())
        } else {
            Err(IspError::NotReady)
        }
    }

    /// Guard an operation that is valid in any state but the given one.
    pub fn forbid(self, unwanted: OpState) -> IspResult<()> {
        if self == unwanted {
            Err(IspError::NotReady)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_matches_exactly() {
        assert!(OpState::Init.require(OpState::Init).is_ok());
        assert_eq!(
            OpState::Run.require(OpState::Ready),
            Err(IspError::NotReady)
        );
    }

    #[test]
    fn forbid_rejects_only_the_named_state() {
        assert!(OpState::Ready.forbid(OpState::Init).is_ok());
        assert!(OpState::Run.forbid(OpState::Init).is_ok());
        assert_eq!(OpState::Init.forbid(OpState::Init), Err(IspError::NotReady));
    }
}
