use glam::Mat4;

use super::SkinningError;
use crate::scratch;

/// One bone of a hierarchy in local space. Parents must precede children.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonePose {
    pub parent: Option<u32>,
    pub local: Mat4,
    pub inverse_bind: Mat4,
}

impl BonePose {
    pub fn root(local: Mat4, inverse_bind: Mat4) -> Self {
        Self {
            parent: None,
            local,
            inverse_bind,
        }
    }

    pub fn child(parent: u32, local: Mat4, inverse_bind: Mat4) -> Self {
        Self {
            parent: Some(parent),
            local,
            inverse_bind,
        }
    }
}

/// Fixed-capacity array of skinning matrices for one instance.
///
/// Exceeding the capacity is a configuration error: the update is rejected
/// and the previous contents stay in place.
#[derive(Debug, Clone)]
pub struct BonePalette {
    capacity: u32,
    matrices: Vec<Mat4>,
}

impl BonePalette {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            matrices: Vec::with_capacity(capacity as usize),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn len(&self) -> u32 {
        self.matrices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn matrices(&self) -> &[Mat4] {
        &self.matrices
    }

    fn check_count(&self, count: usize) -> Result<(), SkinningError> {
        if count > self.capacity as usize {
            let err = SkinningError::TooManyBones {
                count: count as u32,
                capacity: self.capacity,
            };
            log::error!("{}", err);
            return Err(err);
        }
        Ok(())
    }

    /// Copies skinning matrices that were already flattened by the caller.
    pub fn set_flattened(&mut self, matrices: &[Mat4]) -> Result<(), SkinningError> {
        self.check_count(matrices.len())?;
        self.matrices.clear();
        self.matrices.extend_from_slice(matrices);
        Ok(())
    }

    /// Resolves world transforms down the hierarchy and stores
    /// `world * inverse_bind` per bone.
    pub fn flatten_hierarchy(&mut self, bones: &[BonePose]) -> Result<(), SkinningError> {
        self.check_count(bones.len())?;

        scratch::with_mat4_scratch(|world| {
            world.reserve(bones.len());
            for (index, bone) in bones.iter().enumerate() {
                let transform = match bone.parent {
                    None => bone.local,
                    Some(parent) if (parent as usize) < index => world[parent as usize] * bone.local,
                    Some(parent) => {
                        return Err(SkinningError::InvalidParent {
                            bone: index as u32,
                            parent,
                        })
                    }
                };
                world.push(transform);
            }

            self.matrices.clear();
            self.matrices.extend(
                world
                    .iter()
                    .zip(bones)
                    .map(|(world, bone)| *world * bone.inverse_bind),
            );
            Ok(())
        })
    }

    pub fn to_gpu(&self) -> impl Iterator<Item = [[f32; 4]; 4]> + '_ {
        self.matrices.iter().map(Mat4::to_cols_array_2d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn too_many_bones_is_rejected_without_truncation() {
        let mut palette = BonePalette::new(2);
        palette.set_flattened(&[Mat4::IDENTITY]).unwrap();

        let err = palette
            .set_flattened(&[Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY])
            .unwrap_err();
        assert_eq!(
            err,
            SkinningError::TooManyBones {
                count: 3,
                capacity: 2
            }
        );
        assert_eq!(palette.len(), 1);
    }

    #[test]
    fn hierarchy_composes_parent_transforms() {
        let step = Mat4::from_translation(Vec3::X);
        let bones = [
            BonePose::root(step, Mat4::IDENTITY),
            BonePose::child(0, step, Mat4::IDENTITY),
            BonePose::child(1, step, Mat4::IDENTITY),
        ];
        let mut palette = BonePalette::new(8);
        palette.flatten_hierarchy(&bones).unwrap();

        let tip = palette.matrices()[2].transform_point3(Vec3::ZERO);
        assert!((tip - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn bind_pose_flattens_to_identity() {
        let bind = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0));
        let bones = [BonePose::root(bind, bind.inverse())];
        let mut palette = BonePalette::new(1);
        palette.flatten_hierarchy(&bones).unwrap();
        assert!(palette.matrices()[0].abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn forward_parent_reference_is_rejected() {
        let bones = [BonePose::child(1, Mat4::IDENTITY, Mat4::IDENTITY)];
        let mut palette = BonePalette::new(4);
        assert_eq!(
            palette.flatten_hierarchy(&bones),
            Err(SkinningError::InvalidParent { bone: 0, parent: 1 })
        );
    }
}
