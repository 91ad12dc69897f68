mod produce_roundtrip;
