use super::{invalid_argument, LaunchError};

/// 以 `axis` 为界将形状展平为二维，返回 `[rows, cols]`。
///
/// `rows` 是 `shape[..axis]` 的积，`cols` 是 `shape[axis..]` 的积，空积为 1。
pub fn flatten_to_2d(shape: &[usize], axis: usize) -> Result<[usize; 2], LaunchError> {
    if axis > shape.len() {
        return Err(invalid_argument(format!(
            "begin_norm_axis({axis}) is out of range for a tensor of rank {}",
            shape.len(),
        )));
    }
    let (head, tail) = shape.split_at(axis);
    Ok([head.iter().product(), tail.iter().product()])
}

#[cfg(test)]
mod test {
    use super::flatten_to_2d;
    use crate::LaunchErrorKind;

    #[test]
    fn test_flatten() {
        assert_eq!(flatten_to_2d(&[4, 8], 1).unwrap(), [4, 8]);
        assert_eq!(flatten_to_2d(&[2, 3, 4, 5], 2).unwrap(), [6, 20]);
        assert_eq!(flatten_to_2d(&[2, 3, 4], 0).unwrap(), [1, 24]);
        assert_eq!(flatten_to_2d(&[2, 3, 4], 3).unwrap(), [24, 1]);
        assert_eq!(flatten_to_2d(&[], 0).unwrap(), [1, 1]);
        assert_eq!(flatten_to_2d(&[3, 0, 5], 1).unwrap(), [3, 0]);
    }

    #[test]
    fn test_axis_out_of_range() {
        let e = flatten_to_2d(&[4, 8], 3).unwrap_err();
        assert_eq!(e.kind, LaunchErrorKind::InvalidArgument);
    }
}
