//! Gate set.

use serde::{Deserialize, Serialize};

/// Gates the circuit model and the simulator both understand.
///
/// Angles are in radians. For controlled gates the last operand is the
/// target and the others are controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardGate {
    I,
    X,
    Y,
    Z,
    H,
    S,
    Sdg,
    T,
    Tdg,
    SX,
    Rx(f64),
    Ry(f64),
    Rz(f64),
    /// Phase on |1⟩.
    P(f64),
    CX,
    CY,
    CZ,
    Swap,
    /// Controlled phase.
    CP(f64),
    /// Toffoli.
    CCX,
}

impl StandardGate {
    /// Lowercase mnemonic, as used in serialized circuits and error messages.
    pub fn name(&self) -> &'static str {
        self.signature().0
    }

    /// Operand count.
    pub fn num_qubits(&self) -> u32 {
        self.signature().1
    }

    fn signature(&self) -> (&'static str, u32) {
        use StandardGate::*;
        match self {
            I => ("id", 1),
            X => ("x", 1),
            Y => ("y", 1),
            Z => ("z", 1),
            H => ("h", 1),
            S => ("s", 1),
            Sdg => ("sdg", 1),
            T => ("t", 1),
            Tdg => ("tdg", 1),
            SX => ("sx", 1),
            Rx(_) => ("rx", 1),
            Ry(_) => ("ry", 1),
            Rz(_) => ("rz", 1),
            P(_) => ("p", 1),
            CX => ("cx", 2),
            CY => ("cy", 2),
            CZ => ("cz", 2),
            Swap => ("swap", 2),
            CP(_) => ("cp", 2),
            CCX => ("ccx", 3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature() {
        assert_eq!(StandardGate::H.num_qubits(), 1);
        assert_eq!(StandardGate::Rz(0.5).num_qubits(), 1);
        assert_eq!(StandardGate::CX.num_qubits(), 2);
        assert_eq!(StandardGate::CCX.num_qubits(), 3);
        assert_eq!(StandardGate::Sdg.name(), "sdg");
        assert_eq!(StandardGate::CP(1.0).name(), "cp");
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&StandardGate::CX).unwrap(), "\"cx\"");
        let rz: StandardGate = serde_json::from_str(r#"{"rz": 0.25}"#).unwrap();
        assert_eq!(rz, StandardGate::Rz(0.25));
    }
}
