use crate::gc::ChunkHandle;
use crate::lua_vm::{LuaError, LuaVM};

/// A host-provided native function. Operates directly on the VM's stack
/// window (spec §6), returning the number of values it pushed as results.
pub type CFunction = fn(&mut LuaVM) -> Result<i32, LuaError>;

#[derive(Debug, Clone, Copy)]
pub struct LuaClosure {
    pub chunk: ChunkHandle,
}

/// A first-class function value (spec §3 "Closure"): either a compiled Lua
/// function body, or a native callback plus an optional light-userdata
/// slot the host can stash state in (no upvalues/captured environment —
/// that mechanism is explicitly out of scope, spec §1).
#[derive(Clone, Copy)]
pub enum Closure {
    Lua(LuaClosure),
    C { callback: CFunction, userdata: usize },
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Closure::Lua(c) => f.debug_tuple("Closure::Lua").field(c).finish(),
            Closure::C { userdata, .. } => {
                f.debug_struct("Closure::C").field("userdata", userdata).finish()
            }
        }
    }
}
