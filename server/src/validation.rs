//! Shape checks for client-submitted payloads
//!
//! Clients send raw component lists; nothing reaches the room store until it
//! has been turned into typed values here.

use glam::{Quat, Vec3};
use shared::{Locomotion, Transform};
use thiserror::Error;

/// How far a rotation's norm may drift from 1 before it is refused.
pub const UNIT_TOLERANCE: f32 = 1e-2;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PayloadError {
    #[error("position must have 3 components, got {0}")]
    PositionArity(usize),

    #[error("rotation must have 4 components, got {0}")]
    RotationArity(usize),

    #[error("{0} contains a non-finite component")]
    NonFinite(&'static str),

    #[error("rotation is not a unit quaternion (norm {0})")]
    NotUnit(f32),

    #[error("unknown locomotion tag {0:?}")]
    UnknownLocomotion(String),
}

/// Validates a `Move` payload and returns the normalized transform.
pub fn validate_move(position: &[f32], rotation: &[f32]) -> Result<Transform, PayloadError> {
    let position: [f32; 3] = position
        .try_into()
        .map_err(|_| PayloadError::PositionArity(position.len()))?;
    let rotation: [f32; 4] = rotation
        .try_into()
        .map_err(|_| PayloadError::RotationArity(rotation.len()))?;

    let position = Vec3::from_array(position);
    if !position.is_finite() {
        return Err(PayloadError::NonFinite("position"));
    }

    let rotation = Quat::from_array(rotation);
    if !rotation.is_finite() {
        return Err(PayloadError::NonFinite("rotation"));
    }

    let norm = rotation.length();
    if (norm - 1.0).abs() > UNIT_TOLERANCE {
        return Err(PayloadError::NotUnit(norm));
    }

    Ok(Transform::new(position, rotation.normalize()))
}

pub fn validate_animation(tag: &str) -> Result<Locomotion, PayloadError> {
    Locomotion::from_tag(tag).ok_or_else(|| PayloadError::UnknownLocomotion(tag.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_valid_move() {
        let transform = validate_move(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(transform.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(transform.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_position_arity() {
        assert_eq!(
            validate_move(&[1.0, 2.0], &[0.0, 0.0, 0.0, 1.0]),
            Err(PayloadError::PositionArity(2))
        );
        assert_eq!(
            validate_move(&[1.0, 2.0, 3.0, 4.0], &[0.0, 0.0, 0.0, 1.0]),
            Err(PayloadError::PositionArity(4))
        );
        assert_eq!(
            validate_move(&[], &[0.0, 0.0, 0.0, 1.0]),
            Err(PayloadError::PositionArity(0))
        );
    }

    #[test]
    fn test_rotation_arity() {
        // Euler triples are not accepted
        assert_eq!(
            validate_move(&[0.0, 0.0, 0.0], &[0.0, 1.5, 0.0]),
            Err(PayloadError::RotationArity(3))
        );
    }

    #[test]
    fn test_non_finite() {
        assert_eq!(
            validate_move(&[f32::NAN, 0.0, 0.0], &[0.0, 0.0, 0.0, 1.0]),
            Err(PayloadError::NonFinite("position"))
        );
        assert_eq!(
            validate_move(&[0.0, f32::INFINITY, 0.0], &[0.0, 0.0, 0.0, 1.0]),
            Err(PayloadError::NonFinite("position"))
        );
        assert_eq!(
            validate_move(&[0.0, 0.0, 0.0], &[0.0, 0.0, f32::NAN, 1.0]),
            Err(PayloadError::NonFinite("rotation"))
        );
    }

    #[test]
    fn test_rotation_must_be_unit() {
        assert!(matches!(
            validate_move(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0, 0.0]),
            Err(PayloadError::NotUnit(_))
        ));
        assert!(matches!(
            validate_move(&[0.0, 0.0, 0.0], &[0.0, 2.0, 0.0, 0.0]),
            Err(PayloadError::NotUnit(_))
        ));
    }

    #[test]
    fn test_rotation_renormalized_within_tolerance() {
        let transform = validate_move(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0, 1.005]).unwrap();
        assert_approx_eq!(transform.rotation.length(), 1.0, 1e-6);
    }

    #[test]
    fn test_animation_tags() {
        assert_eq!(validate_animation("idle"), Ok(Locomotion::Idle));
        assert_eq!(validate_animation("walk"), Ok(Locomotion::Walk));
        assert_eq!(validate_animation("run"), Ok(Locomotion::Run));
        assert_eq!(
            validate_animation("dance"),
            Err(PayloadError::UnknownLocomotion("dance".to_string()))
        );
    }
}
