//! Formats memcached text-protocol request lines.

fn line(verb: &str, keys: &[&[u8]]) -> Vec<u8> {
    let mut out = verb.as_bytes().to_vec();
    for key in keys {
        out.push(b' ');
        out.extend_from_slice(key);
    }
    out.extend_from_slice(b"\r\n");
    out
}

pub(crate) fn get(key: &[u8]) -> Vec<u8> {
    line("get", &[key])
}

pub(crate) fn gets(key: &[u8]) -> Vec<u8> {
    line("gets", &[key])
}

pub(crate) fn multi_get(keys: &[Vec<u8>]) -> Vec<u8> {
    let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    line("get", &refs)
}

/// `<verb> <key> <flags> <expiry> <bytelen>[ <cas>][ noreply]\r\n<payload>\r\n`
/// used by `set`, `add`, `replace`, `append`, `prepend`, and `cas`.
pub(crate) fn storage(
    verb: &str,
    key: &[u8],
    flags: u32,
    expiry: u32,
    payload: &[u8],
    noreply: bool,
    cas: Option<u64>,
) -> Vec<u8> {
    let mut out = verb.as_bytes().to_vec();
    out.push(b' ');
    out.extend_from_slice(key);
    out.extend_from_slice(format!(" {} {} {}", flags, expiry, payload.len()).as_bytes());
    if let Some(cas) = cas {
        out.extend_from_slice(format!(" {}", cas).as_bytes());
    }
    if noreply {
        out.extend_from_slice(b" noreply");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out
}

/// `append`/`prepend` use the same wire shape as `set`, with the flags
/// and expiry fields ignored by the server.
pub(crate) fn append_prepend(verb: &str, key: &[u8], payload: &[u8], noreply: bool) -> Vec<u8> {
    storage(verb, key, 0, 0, payload, noreply, None)
}

pub(crate) fn incr_decr(verb: &str, key: &[u8], amount: u64, noreply: bool) -> Vec<u8> {
    let mut out = verb.as_bytes().to_vec();
    out.push(b' ');
    out.extend_from_slice(key);
    out.extend_from_slice(format!(" {}", amount).as_bytes());
    if noreply {
        out.extend_from_slice(b" noreply");
    }
    out.extend_from_slice(b"\r\n");
    out
}

pub(crate) fn delete(key: &[u8], noreply: bool) -> Vec<u8> {
    let mut out = b"delete ".to_vec();
    out.extend_from_slice(key);
    if noreply {
        out.extend_from_slice(b" noreply");
    }
    out.extend_from_slice(b"\r\n");
    out
}

pub(crate) fn stats() -> Vec<u8> {
    b"stats\r\n".to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get() {
        assert_eq!(b"get my_namespace:key\r\n".to_vec(), get(b"my_namespace:key"));
    }

    #[test]
    fn test_multi_get() {
        let keys = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        assert_eq!(b"get a b c\r\n".to_vec(), multi_get(&keys));
    }

    #[test]
    fn test_storage_set() {
        let cmd = storage("set", b"my_namespace:key", 0, 0, b"value", false, None);
        assert_eq!(b"set my_namespace:key 0 0 5\r\nvalue\r\n".to_vec(), cmd);
    }

    #[test]
    fn test_storage_noreply() {
        let cmd = storage("set", b"k", 0, 0, b"v", true, None);
        assert_eq!(b"set k 0 0 1 noreply\r\nv\r\n".to_vec(), cmd);
    }

    #[test]
    fn test_storage_cas() {
        let cmd = storage("cas", b"k", 0, 0, b"v", false, Some(42));
        assert_eq!(b"cas k 0 0 1 42\r\nv\r\n".to_vec(), cmd);
    }

    #[test]
    fn test_incr_decr() {
        assert_eq!(b"incr k 5\r\n".to_vec(), incr_decr("incr", b"k", 5, false));
        assert_eq!(
            b"decr k 5 noreply\r\n".to_vec(),
            incr_decr("decr", b"k", 5, true)
        );
    }

    #[test]
    fn test_delete() {
        assert_eq!(b"delete k\r\n".to_vec(), delete(b"k", false));
        assert_eq!(b"delete k noreply\r\n".to_vec(), delete(b"k", true));
    }
}
