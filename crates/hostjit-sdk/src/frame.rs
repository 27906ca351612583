//! Call frame layout
//!
//! A frame is `[param0 .. paramN-1] [ret0 .. retM-1] [code address]`. Every
//! field starts where the previous one ends. Both the compiled caller that
//! fills the frame and the host-side invoker that reads it compute offsets
//! through this type.

use crate::types::HostType;

/// Size of the trailing code-address slot
pub const CODE_SLOT_SIZE: usize = std::mem::size_of::<*const u8>();

/// Offsets of every field of a call frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    param_offsets: Vec<usize>,
    return_offsets: Vec<usize>,
    code_offset: usize,
    size: usize,
}

impl FrameLayout {
    /// Layout for a reflected host signature
    pub fn new(params: &[HostType], returns: &[HostType]) -> Self {
        Self::from_sizes(
            params.iter().map(HostType::size),
            returns.iter().map(HostType::size),
        )
    }

    /// Layout from raw field sizes
    pub fn from_sizes(
        params: impl IntoIterator<Item = usize>,
        returns: impl IntoIterator<Item = usize>,
    ) -> Self {
        let mut offset = 0;
        let mut place = |size: usize| {
            let at = offset;
            offset += size;
            at
        };
        let param_offsets: Vec<usize> = params.into_iter().map(&mut place).collect();
        let return_offsets: Vec<usize> = returns.into_iter().map(&mut place).collect();
        let code_offset = place(CODE_SLOT_SIZE);

        FrameLayout {
            param_offsets,
            return_offsets,
            code_offset,
            size: code_offset + CODE_SLOT_SIZE,
        }
    }

    /// Offset of the code slot in a frame of `size` bytes
    pub const fn code_offset_for(size: usize) -> usize {
        size - CODE_SLOT_SIZE
    }

    /// Parameter field offsets
    pub fn param_offsets(&self) -> &[usize] {
        &self.param_offsets
    }

    /// Return field offsets
    pub fn return_offsets(&self) -> &[usize] {
        &self.return_offsets
    }

    /// Offset of the trailing code slot
    pub fn code_offset(&self) -> usize {
        self.code_offset
    }

    /// Total frame size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Every field offset in frame order, code slot last
    pub fn field_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.param_offsets
            .iter()
            .chain(self.return_offsets.iter())
            .copied()
            .chain(std::iter::once(self.code_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_cumulative() {
        let layout = FrameLayout::new(
            &[HostType::Int64, HostType::Int32, HostType::Bool],
            &[HostType::Float64],
        );
        assert_eq!(layout.param_offsets(), &[0, 8, 12]);
        assert_eq!(layout.return_offsets(), &[13]);
        assert_eq!(layout.code_offset(), 21);
        assert_eq!(layout.size(), 21 + CODE_SLOT_SIZE);
        assert_eq!(FrameLayout::code_offset_for(layout.size()), layout.code_offset());
    }

    #[test]
    fn test_empty_signature_has_only_code_slot() {
        let layout = FrameLayout::new(&[], &[]);
        assert!(layout.param_offsets().is_empty());
        assert!(layout.return_offsets().is_empty());
        assert_eq!(layout.code_offset(), 0);
        assert_eq!(layout.size(), CODE_SLOT_SIZE);
    }

    #[test]
    fn test_field_offsets_strictly_increase() {
        let params = [HostType::Str, HostType::Bool, HostType::Dyn, HostType::Float32];
        let returns = [HostType::Int, HostType::Bool];
        let layout = FrameLayout::new(&params, &returns);

        let sizes: Vec<usize> = params
            .iter()
            .chain(returns.iter())
            .map(HostType::size)
            .chain(std::iter::once(CODE_SLOT_SIZE))
            .collect();
        let offsets: Vec<usize> = layout.field_offsets().collect();

        assert_eq!(offsets.len(), sizes.len());
        for i in 1..offsets.len() {
            assert_eq!(offsets[i], offsets[i - 1] + sizes[i - 1]);
        }
        assert_eq!(layout.size(), sizes.iter().sum::<usize>());
    }
}
