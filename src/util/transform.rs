//! Wrapper around `VkTransformMatrixKHR` for easy usage

use ash::vk;
use glam::Mat4;

use crate::util::to_vk::IntoVulkanType;

/// Represents a row-major affine transformation matrix with 3 rows and 4 columns.
#[derive(Copy, Clone)]
#[repr(transparent)]
pub struct TransformMatrix(vk::TransformMatrixKHR);

impl TransformMatrix {
    /// Create an identity matrix
    pub fn identity() -> Self {
        Self(vk::TransformMatrixKHR {
            matrix: [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        })
    }

    /// Build a 3x4 transform matrix from 12 elements, specified in row-major order.
    pub fn from_elements(elements: &[f32; 12]) -> Self {
        Self(vk::TransformMatrixKHR {
            matrix: *elements,
        })
    }

    /// Build a 3x4 transform matrix from 3 rows of 4 elements.
    pub fn from_rows(rows: &[[f32; 4]; 3]) -> Self {
        Self(vk::TransformMatrixKHR {
            matrix: [
                rows[0][0], rows[0][1], rows[0][2], rows[0][3], rows[1][0], rows[1][1], rows[1][2],
                rows[1][3], rows[2][0], rows[2][1], rows[2][2], rows[2][3],
            ],
        })
    }

    /// Build a transform from a column-major `glam` matrix. The bottom row is dropped, so the matrix
    /// must be affine.
    pub fn from_mat4(matrix: Mat4) -> Self {
        let rows = matrix.transpose().to_cols_array_2d();
        Self::from_rows(&[rows[0], rows[1], rows[2]])
    }

    /// The 12 matrix elements in row-major order
    pub fn elements(&self) -> &[f32; 12] {
        &self.0.matrix
    }

    /// The translation column of this transform
    pub fn translation(&self) -> [f32; 3] {
        [self.0.matrix[3], self.0.matrix[7], self.0.matrix[11]]
    }
}

impl Default for TransformMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl PartialEq for TransformMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.0.matrix == other.0.matrix
    }
}

impl std::fmt::Debug for TransformMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TransformMatrix").field(&self.0.matrix).finish()
    }
}

impl From<Mat4> for TransformMatrix {
    fn from(value: Mat4) -> Self {
        Self::from_mat4(value)
    }
}

impl IntoVulkanType for TransformMatrix {
    type Output = vk::TransformMatrixKHR;

    fn into_vulkan(self) -> Self::Output {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn translation_lands_in_last_column() {
        let transform = TransformMatrix::from_mat4(Mat4::from_translation(Vec3::new(-2.0, 0.5, 3.0)));
        assert_eq!(transform.translation(), [-2.0, 0.5, 3.0]);
        assert_eq!(&transform.elements()[0..3], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn identity_from_mat4() {
        assert_eq!(TransformMatrix::from_mat4(Mat4::IDENTITY), TransformMatrix::identity());
    }

    #[test]
    fn rotation_is_row_major() {
        let angle = 0.25f32;
        let transform = TransformMatrix::from_mat4(Mat4::from_rotation_y(angle));
        // Row 0 of a rotation about Y is (cos, 0, sin)
        let elements = transform.elements();
        assert!((elements[0] - angle.cos()).abs() < 1e-6);
        assert!((elements[2] - angle.sin()).abs() < 1e-6);
        assert!((elements[8] + angle.sin()).abs() < 1e-6);
    }
}
