//! Call record shape
//!
//! A call record is a packed struct: the parameters, then the returns,
//! then one pointer-sized slot for the host function's code address.

use hostjit_sdk::FrameLayout;

use crate::jit::types::Type;

/// Native record type and its offsets
#[derive(Debug, Clone)]
pub struct CallRecord {
    ty: Type,
    layout: FrameLayout,
    num_params: usize,
}

impl CallRecord {
    pub fn new(params: &[Type], returns: &[Type]) -> Self {
        let fields: Vec<Type> = params
            .iter()
            .chain(returns)
            .cloned()
            .chain(std::iter::once(Type::void_ptr()))
            .collect();
        let ty = Type::create_packed_struct(fields);
        let layout = FrameLayout::from_sizes(params.iter().map(Type::size), returns.iter().map(Type::size));

        debug_assert_eq!(ty.size(), layout.size());
        debug_assert!(layout
            .field_offsets()
            .enumerate()
            .all(|(i, off)| ty.offset(i) == Some(off)));

        CallRecord {
            ty,
            layout,
            num_params: params.len(),
        }
    }

    pub fn param_offset(&self, index: usize) -> Option<usize> {
        self.layout.param_offsets().get(index).copied()
    }

    pub fn return_offset(&self, index: usize) -> Option<usize> {
        self.layout.return_offsets().get(index).copied()
    }

    pub fn code_offset(&self) -> usize {
        self.layout.code_offset()
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn num_params(&self) -> usize {
        self.num_params
    }

    pub fn record_type(&self) -> &Type {
        &self.ty
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::type_map::string_type;
    use hostjit_sdk::CODE_SLOT_SIZE;

    #[test]
    fn test_offsets_are_cumulative() {
        let rec = CallRecord::new(&[Type::UByte, Type::Long], &[Type::Int]);
        assert_eq!(rec.param_offset(0), Some(0));
        assert_eq!(rec.param_offset(1), Some(1));
        assert_eq!(rec.return_offset(0), Some(9));
        assert_eq!(rec.code_offset(), 13);
        assert_eq!(rec.size(), 13 + CODE_SLOT_SIZE);
        assert!(rec.record_type().is_packed());
        assert_eq!(rec.record_type().num_fields(), 4);
    }

    #[test]
    fn test_void_fields_take_no_space() {
        let rec = CallRecord::new(&[Type::Void, Type::Int], &[]);
        assert_eq!(rec.param_offset(1), Some(0));
        assert_eq!(rec.code_offset(), 4);
    }

    #[test]
    fn test_string_param() {
        let rec = CallRecord::new(&[string_type()], &[Type::NUInt]);
        assert_eq!(rec.return_offset(0), Some(2 * CODE_SLOT_SIZE));
        assert_eq!(rec.size(), 4 * CODE_SLOT_SIZE);
    }
}
