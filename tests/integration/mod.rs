mod csv_import;
