use crate::error::{ControlError, Result};
use crate::joint::JointKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One joint as declared by an arm description file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JointSpec {
    pub name: String,
    pub servo_id: u8,
    #[serde(default)]
    pub kind: JointKind,
    /// Mechanical travel limits in radians.
    #[serde(default)]
    pub limits_rad: Option<(f64, f64)>,
}

/// Static description of an arm: the joint set is fixed at robot creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArmDescriptor {
    pub name: String,
    pub joints: Vec<JointSpec>,
}

impl ArmDescriptor {
    pub fn from_json(json: &str) -> Result<Self> {
        let desc: ArmDescriptor =
            serde_json::from_str(json).map_err(|e| ControlError::BadDescriptor(e.to_string()))?;
        desc.validate()?;
        Ok(desc)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ControlError::BadDescriptor(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.joints.is_empty() {
            return Err(ControlError::BadDescriptor("no joints declared".into()));
        }
        for (i, a) in self.joints.iter().enumerate() {
            for b in &self.joints[i + 1..] {
                if a.name == b.name {
                    return Err(ControlError::BadDescriptor(format!(
                        "duplicate joint name: {}",
                        a.name
                    )));
                }
                if a.servo_id == b.servo_id {
                    return Err(ControlError::BadDescriptor(format!(
                        "servo id {} used twice",
                        a.servo_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// The stock 6-servo arm this project grew up on.
    pub fn six_dof() -> Self {
        let bipolar = |name: &str, servo_id: u8| JointSpec {
            name: name.to_string(),
            servo_id,
            kind: JointKind::Bipolar,
            limits_rad: Some((-std::f64::consts::PI, std::f64::consts::PI)),
        };
        ArmDescriptor {
            name: "six-dof-arm".to_string(),
            joints: vec![
                bipolar("Rotation", 1),
                bipolar("Pitch", 2),
                bipolar("Elbow", 3),
                bipolar("Wrist_Pitch", 4),
                bipolar("Wrist_Roll", 5),
                JointSpec {
                    name: "Jaw".to_string(),
                    servo_id: 6,
                    kind: JointKind::Unipolar,
                    limits_rad: Some((0.0, std::f64::consts::FRAC_PI_2)),
                },
            ],
        }
    }

    pub fn servo_ids(&self) -> Vec<u8> {
        self.joints.iter().map(|j| j.servo_id).collect()
    }

    pub fn joint(&self, name: &str) -> Option<&JointSpec> {
        self.joints.iter().find(|j| j.name == name)
    }
}
