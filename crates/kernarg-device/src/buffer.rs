use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};
use crate::signature::ElementType;

/// Host copy of one device allocation, typed per the kernel signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HostBuffer {
    #[serde(with = "float_seq")]
    F64(Vec<f64>),
    #[serde(with = "float_seq")]
    F32(Vec<f32>),
    I32(Vec<i32>),
    Usize(Vec<usize>),
}

impl HostBuffer {
    /// Reinterprets raw device bytes as `element`s. The length must be a whole number of
    /// elements.
    pub fn decode(element: ElementType, bytes: &[u8]) -> Result<Self> {
        let width = element.width();
        if bytes.len() % width != 0 {
            return Err(DeviceError::SizeMismatch {
                size: bytes.len() as u64,
                width,
            });
        }
        Ok(match element {
            ElementType::F64 => Self::F64(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::F32 => Self::F32(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::I32 => Self::I32(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Usize => Self::Usize(bytemuck::pod_collect_to_vec(bytes)),
        })
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::F64(_) => ElementType::F64,
            Self::F32(_) => ElementType::F32,
            Self::I32(_) => ElementType::I32,
            Self::Usize(_) => ElementType::Usize,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::F64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::Usize(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widens every element to `f64`, for tolerance-based comparison.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Self::F64(v) => v.clone(),
            Self::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Self::I32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Self::Usize(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }
}

/// Float sequences in JSON. Non-finite elements are written as the strings `"NaN"`, `"inf"` and
/// `"-inf"`; JSON numbers cannot carry them.
mod float_seq {
    use serde::de::{DeserializeOwned, Error as _, Unexpected};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub trait Float: Copy + Serialize + DeserializeOwned {
        const NAN: Self;
        const INFINITY: Self;
        const NEG_INFINITY: Self;

        fn is_finite(self) -> bool;
        fn is_nan(self) -> bool;
        fn is_sign_negative(self) -> bool;
    }

    macro_rules! impl_float {
        ($($t:ty),*) => {$(
            impl Float for $t {
                const NAN: Self = <$t>::NAN;
                const INFINITY: Self = <$t>::INFINITY;
                const NEG_INFINITY: Self = <$t>::NEG_INFINITY;

                fn is_finite(self) -> bool {
                    <$t>::is_finite(self)
                }

                fn is_nan(self) -> bool {
                    <$t>::is_nan(self)
                }

                fn is_sign_negative(self) -> bool {
                    <$t>::is_sign_negative(self)
                }
            }
        )*};
    }

    impl_float!(f32, f64);

    #[derive(Serialize)]
    #[serde(untagged)]
    enum Written<T> {
        Number(T),
        Token(&'static str),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Read<T> {
        Number(T),
        Token(String),
    }

    #[allow(clippy::ptr_arg)]
    pub fn serialize<T: Float, S: Serializer>(
        values: &Vec<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|&v| {
            if v.is_finite() {
                Written::Number(v)
            } else if v.is_nan() {
                Written::Token("NaN")
            } else if v.is_sign_negative() {
                Written::Token("-inf")
            } else {
                Written::Token("inf")
            }
        }))
    }

    pub fn deserialize<'de, T: Float, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<T>, D::Error> {
        Vec::<Read<T>>::deserialize(deserializer)?
            .into_iter()
            .map(|v| match v {
                Read::Number(n) => Ok(n),
                Read::Token(token) => match token.as_str() {
                    "NaN" => Ok(T::NAN),
                    "inf" => Ok(T::INFINITY),
                    "-inf" => Ok(T::NEG_INFINITY),
                    other => Err(D::Error::invalid_value(
                        Unexpected::Str(other),
                        &"a number, \"NaN\", \"inf\" or \"-inf\"",
                    )),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reads_native_endian_elements() {
        let values = [1.5f32, -2.0, 0.25];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        // Start at an odd offset to exercise unaligned input.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);

        let buf = HostBuffer::decode(ElementType::F32, &shifted[1..]).unwrap();
        assert_eq!(buf, HostBuffer::F32(values.to_vec()));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.element_type(), ElementType::F32);
    }

    #[test]
    fn decode_rejects_partial_elements() {
        let err = HostBuffer::decode(ElementType::F64, &[0u8; 12]).unwrap_err();
        assert!(matches!(err, DeviceError::SizeMismatch { size: 12, width: 8 }));
    }

    #[test]
    fn non_finite_floats_survive_json() {
        let buf = HostBuffer::F32(vec![1.5, f32::NAN, f32::INFINITY, f32::NEG_INFINITY]);
        let json = serde_json::to_value(&buf).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "f32", "data": [1.5, "NaN", "inf", "-inf"]})
        );

        let back: HostBuffer = serde_json::from_value(json).unwrap();
        let HostBuffer::F32(values) = back else {
            panic!("wrong variant: {back:?}");
        };
        assert_eq!(values[0], 1.5);
        assert!(values[1].is_nan());
        assert_eq!(values[2], f32::INFINITY);
        assert_eq!(values[3], f32::NEG_INFINITY);

        let doubles: HostBuffer =
            serde_json::from_str(r#"{"type": "f64", "data": [2, "-inf"]}"#).unwrap();
        assert_eq!(doubles, HostBuffer::F64(vec![2.0, f64::NEG_INFINITY]));

        let err = serde_json::from_str::<HostBuffer>(r#"{"type": "f64", "data": ["big"]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn json_shape_is_tagged() {
        let json = serde_json::to_value(HostBuffer::I32(vec![1, 2])).unwrap();
        assert_eq!(json, serde_json::json!({"type": "i32", "data": [1, 2]}));
    }

    #[test]
    fn widening_preserves_values() {
        assert_eq!(HostBuffer::Usize(vec![3, 4]).to_f64_vec(), vec![3.0, 4.0]);
        assert_eq!(HostBuffer::I32(vec![-7]).to_f64_vec(), vec![-7.0]);
    }
}
